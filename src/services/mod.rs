// Services module - Business logic

pub mod card_codec;
pub mod card_engine;
