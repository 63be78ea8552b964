pub mod events;
pub mod fanout;
pub mod messages;
pub mod presence;
pub mod rooms_api;
