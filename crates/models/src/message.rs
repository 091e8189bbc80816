use sea_orm::entity::prelude::*;
use uuid::Uuid;
use serde::{Deserialize, Serialize};

use crate::conversation;

/// Message rows carry no company id; the tenant comes from the conversation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Conversation,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::Conversation => Entity::belongs_to(conversation::Entity)
                .from(Column::ConversationId)
                .to(conversation::Column::Id)
                .into(),
        }
    }
}

impl Related<conversation::Entity> for Entity {
    fn to() -> RelationDef { Relation::Conversation.def() }
}

impl ActiveModelBehavior for ActiveModel {}
