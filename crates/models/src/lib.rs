pub mod errors;
pub mod db;
pub mod company;
pub mod user;
pub mod invite;
pub mod session;
pub mod audit_log;
pub mod conversation;
pub mod message;
pub mod ticket;

#[cfg(test)]
mod tests;
