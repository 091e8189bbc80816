//! AuditRecorder: append-only audit log and the company-scoped trail reader.

use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{AuditCursor, AuditFilter, AuditLog, NewAuditEntry};
use crate::errors::AccessError;
use crate::pagination::{clamp_page_size, decode_cursor, encode_cursor, Page};
use crate::repository::IdentityRepository;
use crate::retry::{retry_read, RetryPolicy};

#[derive(Clone)]
pub struct AuditRecorder {
    repo: Arc<dyn IdentityRepository>,
    retry: RetryPolicy,
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn IdentityRepository>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    /// Standalone append for events that carry no domain write of their own.
    #[instrument(skip(self, entry), fields(action = %entry.action))]
    pub async fn record(&self, entry: NewAuditEntry) -> Result<AuditLog, AccessError> {
        let log = self.repo.append_audit(entry).await?;
        debug!(audit_id = %log.id, risk = log.risk.as_str(), "audit_recorded");
        Ok(log)
    }

    /// Restartable trail over `company_id`, oldest first.
    pub fn query_trail(&self, company_id: Uuid, filter: AuditFilter, page_size: Option<u64>) -> AuditTrail {
        AuditTrail {
            repo: self.repo.clone(),
            retry: self.retry.clone(),
            company_id,
            filter,
            page_size: clamp_page_size(page_size),
            start: None,
            cursor: None,
            done: false,
        }
    }

    /// One page addressed by an opaque cursor, for request/response callers.
    #[instrument(skip(self, filter, cursor))]
    pub async fn page(
        &self,
        company_id: Uuid,
        filter: &AuditFilter,
        cursor: Option<&str>,
        page_size: Option<u64>,
    ) -> Result<Page<AuditLog>, AccessError> {
        let after = cursor.map(decode_cursor).transpose()?;
        let limit = clamp_page_size(page_size);
        let repo = &self.repo;
        // one extra row tells whether another page exists
        let mut items = retry_read(&self.retry, move || repo.audit_page(company_id, filter, after, limit + 1)).await?;
        let next_cursor = if items.len() as u64 > limit {
            items.truncate(limit as usize);
            items.last().map(|l| encode_cursor(&AuditCursor::of(l)))
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }
}

/// Keyset-paginated, finite view of one company's audit log.
pub struct AuditTrail {
    repo: Arc<dyn IdentityRepository>,
    retry: RetryPolicy,
    company_id: Uuid,
    filter: AuditFilter,
    page_size: u64,
    start: Option<AuditCursor>,
    cursor: Option<AuditCursor>,
    done: bool,
}

impl AuditTrail {
    /// Resume after an opaque cursor from a previous trail or page.
    pub fn starting_after(mut self, raw: &str) -> Result<Self, AccessError> {
        let cursor = decode_cursor(raw)?;
        self.start = Some(cursor);
        self.cursor = Some(cursor);
        self.done = false;
        Ok(self)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Position after the last delivered entry.
    pub fn cursor(&self) -> Option<String> {
        self.cursor.as_ref().map(encode_cursor)
    }

    /// Rewind to where the trail started.
    pub fn restart(&mut self) {
        self.cursor = self.start;
        self.done = false;
    }

    /// Next page, or `None` once the trail is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<AuditLog>>, AccessError> {
        if self.done {
            return Ok(None);
        }
        let repo = &self.repo;
        let filter = &self.filter;
        let (company_id, after, limit) = (self.company_id, self.cursor, self.page_size);
        let rows = retry_read(&self.retry, move || repo.audit_page(company_id, filter, after, limit)).await?;

        if (rows.len() as u64) < limit {
            self.done = true;
        }
        match rows.last() {
            Some(last) => {
                self.cursor = Some(AuditCursor::of(last));
                Ok(Some(rows))
            }
            None => Ok(None),
        }
    }

    /// Entry-by-entry stream over the remaining trail.
    pub fn into_stream(self) -> impl Stream<Item = Result<AuditLog, AccessError>> + Send {
        stream::try_unfold(self, |mut trail| async move {
            Ok::<_, AccessError>(trail
                .next_page()
                .await?
                .map(|rows| (stream::iter(rows.into_iter().map(Ok::<_, AccessError>)), trail)))
        })
        .try_flatten()
    }
}
