// Models module - Database entity representations

pub mod card;
pub mod user;

pub use card::{Card, CardStatus, CardView, NewCard, Page};
pub use user::{Role, User};
