pub mod chat;
pub mod participant;
pub mod poll;
pub mod room;

pub use chat::ChatMessage;
pub use participant::{MediaFlags, Participant, Role};
pub use poll::{Poll, PollOption};
pub use room::{AdminSetting, AdminSettings, RoomSnapshot};
