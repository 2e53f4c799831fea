mod item;

pub use item::{
    clamp_score, source_from_url, Item, ItemStatus, NewItem, Rating, SummaryPayload, MAX_SCORE,
    MIN_SCORE,
};
