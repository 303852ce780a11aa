//! Lookups by address, relationship and pattern.
//!
//! Patterns use the server's simple wildcards (`*`, `?`) per segment. The
//! listing commands page with `start_at` / `limit`; the server allocates room
//! for `limit` entries up front, so keep it reasonable.
use std::collections::BTreeMap;

use super::{optional_str, optional_value, required_bool, required_str, unexpected};
use crate::{
    Client, ClientError,
    key::{StoreAddress, StoreKey, unescape_segment},
    protocol::Response,
    value::Value,
};

/// Target of a relationship link.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipValue {
    pub key: StoreKey,
    pub current_value: Option<Value>,
}

/// One child segment returned by [`Client::get_level_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelKey {
    /// The unescaped segment.
    pub segment: String,
    pub has_value: bool,
    pub has_children: bool,
}

/// One key returned by [`Client::get_matching_keys`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMatch {
    pub key: StoreKey,
    pub metadata: BTreeMap<String, String>,
    pub has_value: bool,
    pub has_children: bool,
    pub current_value: Option<Value>,
    pub relationships: Vec<StoreAddress>,
}

/// One key returned by [`Client::get_matching_key_values`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueMatch {
    pub key: StoreKey,
    pub metadata: BTreeMap<String, String>,
    pub has_children: bool,
    pub current_value: Option<Value>,
    pub relationships: Vec<StoreAddress>,
}

fn optional_key(response: &Response) -> Option<StoreKey> {
    optional_str(response, "key").map(StoreKey::from)
}

/// The objects in the array member `field`; a missing member is empty.
fn entries<'a>(response: &'a Response, field: &str) -> Result<Vec<&'a Response>, ClientError> {
    let Some(list) = response.get(field) else {
        return Ok(Vec::new());
    };
    list.as_array()
        .ok_or_else(|| unexpected(field))?
        .iter()
        .map(|entry| entry.as_object().ok_or_else(|| unexpected(field)))
        .collect()
}

fn metadata(entry: &Response) -> Result<BTreeMap<String, String>, ClientError> {
    let Some(members) = entry.get("metadata") else {
        return Ok(BTreeMap::new());
    };
    members
        .as_object()
        .ok_or_else(|| unexpected("metadata"))?
        .iter()
        .map(|(name, value)| {
            let value = value.as_str().ok_or_else(|| unexpected("metadata"))?;
            Ok::<_, ClientError>((name.clone(), value.to_string()))
        })
        .collect()
}

fn relationships(entry: &Response) -> Result<Vec<StoreAddress>, ClientError> {
    let Some(list) = entry.get("relationships") else {
        return Ok(Vec::new());
    };
    list.as_array()
        .ok_or_else(|| unexpected("relationships"))?
        .iter()
        .map(|address| address.as_u64().ok_or_else(|| unexpected("relationships")))
        .collect()
}

fn paging(start_at: usize, limit: usize) -> [String; 5] {
    [
        "--start".to_string(),
        start_at.to_string(),
        "--limit".to_string(),
        limit.to_string(),
        "--detailed".to_string(),
    ]
}

impl Client {
    /// Key at `address`, if the node exists.
    pub fn key_from_address(&self, address: StoreAddress) -> Result<Option<StoreKey>, ClientError> {
        let address = address.to_string();
        let response = self.raw_command(&["addrk", address.as_str()])?;
        Ok(optional_key(&response))
    }

    /// Key and current value at `address`. `None` if the node doesn't exist.
    pub fn key_value_from_address(
        &self,
        address: StoreAddress,
    ) -> Result<Option<(StoreKey, Option<Value>)>, ClientError> {
        let address = address.to_string();
        let response = self.raw_command(&["addrv", address.as_str()])?;

        let Some(key) = optional_key(&response) else {
            return Ok(None);
        };
        Ok(Some((key, optional_value(&response, "value", "type")?)))
    }

    /// Follows relationship `index` of `sk`.
    ///
    /// Returns whether a link is stored at `index`, and the link's target if
    /// the target still exists.
    pub fn get_relationship_value(
        &self,
        sk: &StoreKey,
        index: usize,
    ) -> Result<(bool, Option<RelationshipValue>), ClientError> {
        let index = index.to_string();
        let response = self.raw_command(&["follow", sk.path(), index.as_str()])?;

        let has_link = required_bool(&response, "has_link")?;
        let target = match optional_key(&response) {
            Some(key) => Some(RelationshipValue {
                key,
                current_value: optional_value(&response, "value", "type")?,
            }),
            None => None,
        };
        Ok((has_link, target))
    }

    /// Child segments of `sk` matching `pattern`.
    pub fn get_level_keys(
        &self,
        sk: &StoreKey,
        pattern: &str,
        start_at: usize,
        limit: usize,
    ) -> Result<Vec<LevelKey>, ClientError> {
        let mut args = vec!["nodes".to_string(), sk.path().to_string(), pattern.to_string()];
        args.extend(paging(start_at, limit));
        let response = self.raw_command(&args)?;

        entries(&response, "keys")?
            .into_iter()
            .map(|entry| {
                Ok::<_, ClientError>(LevelKey {
                    segment: unescape_segment(required_str(entry, "segment")?),
                    has_value: required_bool(entry, "has_value")?,
                    has_children: required_bool(entry, "has_children")?,
                })
            })
            .collect()
    }

    /// Every key matching `pattern`, level by level, with full details.
    pub fn get_matching_keys(
        &self,
        pattern: &StoreKey,
        start_at: usize,
        limit: usize,
    ) -> Result<Vec<KeyMatch>, ClientError> {
        let mut args = vec!["lsk".to_string(), pattern.path().to_string()];
        args.extend(paging(start_at, limit));
        let response = self.raw_command(&args)?;

        entries(&response, "keys")?
            .into_iter()
            .map(|entry| {
                Ok::<_, ClientError>(KeyMatch {
                    key: StoreKey::from(required_str(entry, "key")?),
                    metadata: metadata(entry)?,
                    has_value: required_bool(entry, "has_value")?,
                    has_children: required_bool(entry, "has_children")?,
                    current_value: optional_value(entry, "current_value", "current_type")?,
                    relationships: relationships(entry)?,
                })
            })
            .collect()
    }

    /// Like [`get_matching_keys`](Client::get_matching_keys), restricted to
    /// keys that have a value.
    pub fn get_matching_key_values(
        &self,
        pattern: &StoreKey,
        start_at: usize,
        limit: usize,
    ) -> Result<Vec<KeyValueMatch>, ClientError> {
        let mut args = vec!["lsv".to_string(), pattern.path().to_string()];
        args.extend(paging(start_at, limit));
        let response = self.raw_command(&args)?;

        entries(&response, "values")?
            .into_iter()
            .map(|entry| {
                Ok::<_, ClientError>(KeyValueMatch {
                    key: StoreKey::from(required_str(entry, "key")?),
                    metadata: metadata(entry)?,
                    has_children: required_bool(entry, "has_children")?,
                    current_value: optional_value(entry, "current_value", "current_type")?,
                    relationships: relationships(entry)?,
                })
            })
            .collect()
    }
}
