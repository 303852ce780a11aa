//! Typed TreeStore operations.
//!
//! Each method here is one [`Client::raw_command`] call: it formats the
//! command arguments, sends them, and pulls the interesting fields out of the
//! response object. Values travel escaped next to their type tag (see
//! [`value`](crate::value)).
//!
//! # Expiration
//!
//! Expirations are Unix nanosecond ticks on the wire. [`Expiration`] keeps the
//! two meanings apart: [`Expiration::Clear`] removes an expiration and is sent
//! as `0`; [`Expiration::At`] is a point in time and is always sent as a
//! positive tick, so a time at or before the epoch means "already expired",
//! never "clear". Operations that can leave the expiration untouched take an
//! `Option<Expiration>`.
//!
//! Lookups by address and pattern live in [`query`]; the JSON projection,
//! import and export live in [`json`].
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;

use crate::{
    Client, ClientError,
    key::{StoreAddress, StoreKey},
    protocol::Response,
    value::Value,
};

pub mod json;
pub mod query;

pub use json::JsonOptions;
pub use query::{KeyMatch, KeyValueMatch, LevelKey, RelationshipValue};

/// Expiration of a key node or key value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// No expiration.
    Clear,
    /// Expires at the given time.
    At(SystemTime),
}

impl Expiration {
    /// An expiration that has already passed.
    pub fn expired() -> Self {
        Expiration::At(UNIX_EPOCH)
    }

    pub fn after(ttl: Duration) -> Self {
        Expiration::At(SystemTime::now() + ttl)
    }

    fn to_epoch_ns(self) -> String {
        match self {
            Expiration::Clear => "0".to_string(),
            Expiration::At(when) => {
                let ns = when
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos())
                    .clamp(1, i64::MAX as u128);
                ns.to_string()
            }
        }
    }

    fn from_epoch_ns(ns: i64) -> Option<Self> {
        match ns {
            ns if ns < 0 => None,
            0 => Some(Expiration::Clear),
            ns => Some(Expiration::At(UNIX_EPOCH + Duration::from_nanos(ns as u64))),
        }
    }
}

/// Point in a key's value history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTime {
    /// An absolute time.
    At(SystemTime),
    /// This long before the server's current time.
    Ago(Duration),
}

impl HistoryTime {
    fn to_request_ns(self) -> String {
        match self {
            HistoryTime::At(when) => Expiration::At(when).to_epoch_ns(),
            HistoryTime::Ago(ago) if ago.is_zero() => "0".to_string(),
            HistoryTime::Ago(ago) => format!("-{}", ago.as_nanos().min(i64::MAX as u128)),
        }
    }
}

impl From<SystemTime> for HistoryTime {
    fn from(when: SystemTime) -> Self {
        HistoryTime::At(when)
    }
}

/// What [`Client::set_key_value_ex`] does with the key's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ValueUpdate {
    /// Leave the value and the value history alone.
    #[default]
    Keep,
    /// Store an empty (nil) value.
    Nil,
    Set(Value),
}

/// Existence precondition for [`Client::set_key_value_ex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    MustExist,
    MustNotExist,
}

/// Options of [`Client::set_key_value_ex`]. The default changes nothing but
/// ensures the key exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetExOptions {
    pub value: ValueUpdate,
    pub condition: SetCondition,
    /// `None` keeps the current expiration.
    pub expiration: Option<Expiration>,
    /// `None` keeps the current relationships; an empty list removes them.
    pub relationships: Option<Vec<StoreAddress>>,
}

/// Result of [`Client::set_key_value_ex`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetExOutcome {
    pub address: StoreAddress,
    pub exists: bool,
    /// Value the key held before the call, even if nothing changed.
    pub original_value: Option<Value>,
}

/// Result of [`Client::calculate_key_value`].
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    pub address: StoreAddress,
    pub value: Option<Value>,
}

/// Result of [`Client::get_key_value`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key_exists: bool,
    pub value: Option<Value>,
}

/// Result of [`Client::delete_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedKey {
    /// The key node itself was removed (it had no children).
    pub key_removed: bool,
    /// The value that was cleared, if the key had one.
    pub original_value: Option<Value>,
}

/// Result of [`Client::move_key`] and [`Client::move_referenced_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub exists: bool,
    pub moved: bool,
}

fn unexpected(field: &str) -> ClientError {
    ClientError::UnexpectedResponse {
        field: field.to_string(),
    }
}

fn required_bool(response: &Response, field: &str) -> Result<bool, ClientError> {
    response
        .get(field)
        .and_then(JsonValue::as_bool)
        .ok_or_else(|| unexpected(field))
}

fn optional_bool(response: &Response, field: &str) -> bool {
    response
        .get(field)
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

fn required_address(response: &Response, field: &str) -> Result<StoreAddress, ClientError> {
    optional_address(response, field).ok_or_else(|| unexpected(field))
}

fn optional_address(response: &Response, field: &str) -> Option<StoreAddress> {
    response.get(field).and_then(JsonValue::as_u64)
}

fn optional_str<'a>(response: &'a Response, field: &str) -> Option<&'a str> {
    response.get(field).and_then(JsonValue::as_str)
}

fn required_str<'a>(response: &'a Response, field: &str) -> Result<&'a str, ClientError> {
    optional_str(response, field).ok_or_else(|| unexpected(field))
}

/// Decodes the escaped value in `value_field`, typed by `type_field`.
fn optional_value(
    response: &Response,
    value_field: &str,
    type_field: &str,
) -> Result<Option<Value>, ClientError> {
    let Some(escaped) = optional_str(response, value_field) else {
        return Ok(None);
    };
    let type_tag = optional_str(response, type_field).unwrap_or_default();
    Ok(Some(Value::decode(escaped, type_tag)?))
}

fn optional_expiration(response: &Response, field: &str) -> Result<Option<Expiration>, ClientError> {
    match optional_str(response, field) {
        Some(ns) => {
            let ns = ns.parse::<i64>().map_err(|_| unexpected(field))?;
            Ok(Expiration::from_epoch_ns(ns))
        }
        None => Ok(None),
    }
}

/// Appends the escaped value and, unless the value is raw bytes, its type.
fn push_value(args: &mut Vec<String>, value: &Value) {
    let (escaped, type_tag) = value.encode();
    args.push(escaped);
    if !type_tag.is_empty() {
        args.push("--value-type".to_string());
        args.push(type_tag.into_owned());
    }
}

impl Client {
    /// Ensures a key exists without touching its value or expiration.
    ///
    /// Returns the key's address and whether it already existed.
    pub fn set_key(&self, sk: &StoreKey) -> Result<(StoreAddress, bool), ClientError> {
        let response = self.raw_command(&["setk", sk.path()])?;
        Ok((
            required_address(&response, "address")?,
            required_bool(&response, "exists")?,
        ))
    }

    /// Sets a key's value, adding to its value history.
    ///
    /// Returns the key's address and whether this is the key's first value.
    pub fn set_key_value(
        &self,
        sk: &StoreKey,
        value: &Value,
    ) -> Result<(StoreAddress, bool), ClientError> {
        let mut args = vec!["setv".to_string(), sk.path().to_string()];
        push_value(&mut args, value);

        let response = self.raw_command(&args)?;
        Ok((
            required_address(&response, "address")?,
            required_bool(&response, "firstValue")?,
        ))
    }

    /// Sets `sk` like [`set_key`](Client::set_key), but only if `test_sk`
    /// exists.
    ///
    /// Returns the address of `sk`, or `None` if the test key is missing, and
    /// whether `sk` already existed.
    pub fn set_key_if_exists(
        &self,
        test_sk: &StoreKey,
        sk: &StoreKey,
    ) -> Result<(Option<StoreAddress>, bool), ClientError> {
        let response = self.raw_command(&["setif", test_sk.path(), sk.path()])?;
        Ok((
            optional_address(&response, "address").filter(|&address| address != 0),
            optional_bool(&response, "exists"),
        ))
    }

    /// Ensures a key exists and applies `options` to it in one command.
    pub fn set_key_value_ex(
        &self,
        sk: &StoreKey,
        options: &SetExOptions,
    ) -> Result<SetExOutcome, ClientError> {
        let mut args = vec!["setex".to_string(), sk.path().to_string()];
        match &options.value {
            ValueUpdate::Keep => {}
            ValueUpdate::Nil => args.push("--nil".to_string()),
            ValueUpdate::Set(value) => {
                args.push("--value".to_string());
                push_value(&mut args, value);
            }
        }
        match options.condition {
            SetCondition::Always => {}
            SetCondition::MustExist => args.push("--mx".to_string()),
            SetCondition::MustNotExist => args.push("--nx".to_string()),
        }
        if let Some(expiration) = options.expiration {
            args.push("--ns".to_string());
            args.push(expiration.to_epoch_ns());
        }
        if let Some(relationships) = &options.relationships {
            let joined = relationships
                .iter()
                .map(StoreAddress::to_string)
                .collect::<Vec<_>>()
                .join(",");
            args.push("--relationships".to_string());
            args.push(joined);
        }

        let response = self.raw_command(&args)?;
        Ok(SetExOutcome {
            address: required_address(&response, "address")?,
            exists: required_bool(&response, "exists")?,
            original_value: optional_value(&response, "original_value", "original_type")?,
        })
    }

    /// Address of the key if it is indexed (has value history).
    pub fn is_key_indexed(&self, sk: &StoreKey) -> Result<Option<StoreAddress>, ClientError> {
        let response = self.raw_command(&["indexed", sk.path()])?;
        Ok(optional_address(&response, "address"))
    }

    /// Address of the key found by walking the tree, indexed or not.
    pub fn locate_key(&self, sk: &StoreKey) -> Result<Option<StoreAddress>, ClientError> {
        let response = self.raw_command(&["getk", sk.path()])?;
        Ok(optional_address(&response, "address"))
    }

    /// Expiration of the key node, or `None` if the key does not exist.
    pub fn get_key_ttl(&self, sk: &StoreKey) -> Result<Option<Expiration>, ClientError> {
        let response = self.raw_command(&["ttlk", sk.path()])?;
        optional_expiration(&response, "ttl")
    }

    /// Sets or clears the key node's expiration. Returns whether the key exists.
    pub fn set_key_ttl(&self, sk: &StoreKey, expiration: Expiration) -> Result<bool, ClientError> {
        let ns = expiration.to_epoch_ns();
        let response = self.raw_command(&["expirekns", sk.path(), ns.as_str()])?;
        required_bool(&response, "exists")
    }

    pub fn get_key_value(&self, sk: &StoreKey) -> Result<KeyValue, ClientError> {
        let response = self.raw_command(&["getv", sk.path()])?;

        let key_exists = required_bool(&response, "key_exists")?;
        let value = if key_exists {
            optional_value(&response, "value", "type")?
        } else {
            None
        };
        Ok(KeyValue { key_exists, value })
    }

    /// Expiration of the key's value, or `None` if it has no value.
    pub fn get_key_value_ttl(&self, sk: &StoreKey) -> Result<Option<Expiration>, ClientError> {
        let response = self.raw_command(&["ttlv", sk.path()])?;
        optional_expiration(&response, "ttl")
    }

    /// Sets or clears the expiration of the key's value.
    pub fn set_key_value_ttl(
        &self,
        sk: &StoreKey,
        expiration: Expiration,
    ) -> Result<bool, ClientError> {
        let ns = expiration.to_epoch_ns();
        let response = self.raw_command(&["expirevns", sk.path(), ns.as_str()])?;
        required_bool(&response, "exists")
    }

    /// The key's value as of `when`, looked up in its value history.
    pub fn get_key_value_at_time(
        &self,
        sk: &StoreKey,
        when: impl Into<HistoryTime>,
    ) -> Result<Option<Value>, ClientError> {
        let ns = when.into().to_request_ns();
        let response = self.raw_command(&["vat", sk.path(), ns.as_str()])?;
        optional_value(&response, "value", "value_type")
    }

    /// Deletes an indexed key's value, history and metadata.
    ///
    /// With `clean`, parent nodes left empty are removed too. Returns the
    /// removed value, or `None` if nothing was deleted.
    pub fn delete_key_with_value(
        &self,
        sk: &StoreKey,
        clean: bool,
    ) -> Result<Option<Value>, ClientError> {
        let mut args = vec!["delv", sk.path()];
        if clean {
            args.push("--clean");
        }

        let response = self.raw_command(&args)?;
        optional_value(&response, "original_value", "original_type")
    }

    /// Deletes a key's value, and the key node too when it has no children.
    pub fn delete_key(&self, sk: &StoreKey) -> Result<DeletedKey, ClientError> {
        let response = self.raw_command(&["delk", sk.path()])?;
        Ok(DeletedKey {
            key_removed: required_bool(&response, "key_removed")?,
            original_value: optional_value(&response, "original_value", "original_type")?,
        })
    }

    /// Deletes a key and everything below it.
    pub fn delete_key_tree(&self, sk: &StoreKey) -> Result<bool, ClientError> {
        let response = self.raw_command(&["deltree", sk.path()])?;
        required_bool(&response, "removed")
    }

    /// Sets a metadata attribute. Returns whether the key exists and the
    /// attribute's prior value.
    pub fn set_metadata_attribute(
        &self,
        sk: &StoreKey,
        attribute: &str,
        value: &str,
    ) -> Result<(bool, Option<String>), ClientError> {
        let response = self.raw_command(&["setmeta", sk.path(), attribute, value])?;
        Ok((
            required_bool(&response, "key_exists")?,
            optional_str(&response, "prior_value").map(str::to_string),
        ))
    }

    pub fn get_metadata_attribute(
        &self,
        sk: &StoreKey,
        attribute: &str,
    ) -> Result<Option<String>, ClientError> {
        let response = self.raw_command(&["getmeta", sk.path(), attribute])?;
        Ok(optional_str(&response, "value").map(str::to_string))
    }

    /// Removes one metadata attribute, returning its value if it existed.
    pub fn clear_metadata_attribute(
        &self,
        sk: &StoreKey,
        attribute: &str,
    ) -> Result<Option<String>, ClientError> {
        let response = self.raw_command(&["delmeta", sk.path(), attribute])?;
        Ok(optional_str(&response, "original_value").map(str::to_string))
    }

    /// Discards all metadata on the key.
    pub fn clear_key_metadata(&self, sk: &StoreKey) -> Result<(), ClientError> {
        self.raw_command(&["resetmeta", sk.path()])?;
        Ok(())
    }

    pub fn get_metadata_attributes(&self, sk: &StoreKey) -> Result<Vec<String>, ClientError> {
        let response = self.raw_command(&["lsmeta", sk.path()])?;

        let Some(attributes) = response.get("attributes") else {
            return Ok(Vec::new());
        };
        attributes
            .as_array()
            .ok_or_else(|| unexpected("attributes"))?
            .iter()
            .map(|a| {
                a.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| unexpected("attributes"))
            })
            .collect()
    }

    /// Evaluates `expression` on the server and stores the result in `sk`.
    ///
    /// The expression sees the current value as `self` (or `i`, `u`, `f` to
    /// force the stored type) and can read other keys with `lookup(path)`.
    /// Returns `None` when the expression declined to write, e.g. via `fail()`.
    pub fn calculate_key_value(
        &self,
        sk: &StoreKey,
        expression: &str,
    ) -> Result<Option<Calculation>, ClientError> {
        let response = self.raw_command(&["calc", sk.path(), expression])?;

        let Some(address) = optional_address(&response, "address") else {
            return Ok(None);
        };
        Ok(Some(Calculation {
            address,
            value: optional_value(&response, "value", "type")?,
        }))
    }

    /// Moves a key tree atomically, optionally replacing the destination.
    pub fn move_key(
        &self,
        src: &StoreKey,
        dest: &StoreKey,
        overwrite: bool,
    ) -> Result<MoveOutcome, ClientError> {
        let mut args = vec!["mv", src.path(), dest.path()];
        if overwrite {
            args.push("--overwrite");
        }

        let response = self.raw_command(&args)?;
        Ok(MoveOutcome {
            exists: optional_bool(&response, "exists"),
            moved: optional_bool(&response, "moved"),
        })
    }

    /// Moves a staged key to its permanent path and points each key in `refs`
    /// at the destination (relationship index 0), creating them as needed.
    ///
    /// `ttl` applies to the destination and the reference keys; `None` keeps
    /// the source key's expiration.
    pub fn move_referenced_key(
        &self,
        src: &StoreKey,
        dest: &StoreKey,
        overwrite: bool,
        ttl: Option<Expiration>,
        refs: &[StoreKey],
    ) -> Result<MoveOutcome, ClientError> {
        let mut args = vec![
            "mvref".to_string(),
            src.path().to_string(),
            dest.path().to_string(),
        ];
        if overwrite {
            args.push("--overwrite".to_string());
        }
        if let Some(ttl) = ttl {
            args.push("--ns".to_string());
            args.push(ttl.to_epoch_ns());
        }
        for r in refs {
            args.push("--ref".to_string());
            args.push(r.path().to_string());
        }

        let response = self.raw_command(&args)?;
        Ok(MoveOutcome {
            exists: optional_bool(&response, "exists"),
            moved: optional_bool(&response, "moved"),
        })
    }
}
