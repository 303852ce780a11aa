pub mod cli;
pub mod client;
pub mod key;
pub mod protocol;
pub mod store;
pub mod value;

pub use client::{Client, ClientError};
pub use key::{StoreAddress, StoreKey};
pub use protocol::{Endpoint, Response};
pub use store::{
    Calculation, DeletedKey, Expiration, HistoryTime, JsonOptions, KeyMatch, KeyValue,
    KeyValueMatch, LevelKey, MoveOutcome, RelationshipValue, SetCondition, SetExOptions,
    SetExOutcome, ValueUpdate,
};
pub use value::{Value, ValueError};
