//! JSON projection of key trees, plus import and export.
//!
//! The projection maps a JSON document onto a key tree: object members become
//! child keys, leaves become typed values. Keys whose `array` metadata is
//! `"true"` project as arrays, their children being big-endian `u32` indices.
//!
//! Every write comes in two forms: one taking a serializable document, and a
//! `_base64` form that forwards an already base64-encoded document for the
//! server to decode.
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use super::{optional_address, optional_bool, required_str};
use crate::{
    Client, ClientError,
    key::{StoreAddress, StoreKey},
    protocol::Response,
    value::ValueError,
};

/// Options of the JSON projection commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Store JSON string values as key segments instead of values.
    pub string_values_as_keys: bool,
}

enum Payload<'a> {
    Document(String),
    Base64(&'a str),
}

impl Payload<'_> {
    fn document<T: Serialize + ?Sized>(data: &T) -> Result<Self, ClientError> {
        let text = serde_json::to_string(data).map_err(ValueError::from)?;
        Ok(Payload::Document(text))
    }
}

fn command_args(verb: &str, sk: &StoreKey, payload: Payload<'_>, opt: JsonOptions) -> Vec<String> {
    let mut args = vec![verb.to_string(), sk.path().to_string()];
    match payload {
        Payload::Document(text) => args.push(text),
        Payload::Base64(b64) => {
            args.push(b64.to_string());
            args.push("--base64".to_string());
        }
    }
    if opt.string_values_as_keys {
        args.push("--straskey".to_string());
    }
    args
}

fn getjson_args(sk: &StoreKey, base64: bool, opt: JsonOptions) -> Vec<String> {
    let mut args = vec!["getjson".to_string(), sk.path().to_string()];
    if base64 {
        args.push("--base64".to_string());
    }
    if opt.string_values_as_keys {
        args.push("--straskey".to_string());
    }
    args
}

fn replaced_and_address(response: &Response) -> (bool, Option<StoreAddress>) {
    (
        optional_bool(response, "replaced"),
        optional_address(response, "address"),
    )
}

impl Client {
    /// Serializes the tree below `sk` into one JSON document.
    ///
    /// The server builds the document in memory under an exclusive lock.
    pub fn export(&self, sk: &StoreKey) -> Result<JsonValue, ClientError> {
        let mut response = self.raw_command(&["export", sk.path()])?;
        Ok(response.remove("data").unwrap_or(JsonValue::Null))
    }

    /// Like [`export`](Client::export), with the document base64 encoded.
    pub fn export_base64(&self, sk: &StoreKey) -> Result<String, ClientError> {
        let response = self.raw_command(&["export", sk.path(), "--base64"])?;
        Ok(required_str(&response, "base64")?.to_string())
    }

    /// Recreates a tree from an [`export`](Client::export) document at `sk`,
    /// replacing whatever was there.
    pub fn import<T: Serialize + ?Sized>(&self, sk: &StoreKey, data: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(data).map_err(ValueError::from)?;
        self.raw_command(&["import", sk.path(), text.as_str()])?;
        Ok(())
    }

    pub fn import_base64(&self, sk: &StoreKey, b64: &str) -> Result<(), ClientError> {
        self.raw_command(&["import", sk.path(), b64, "--base64"])?;
        Ok(())
    }

    /// Projects the tree below `sk` as a JSON document.
    pub fn get_key_as_json(&self, sk: &StoreKey, opt: JsonOptions) -> Result<JsonValue, ClientError> {
        let mut response = self.raw_command(&getjson_args(sk, false, opt))?;
        Ok(response.remove("data").unwrap_or(JsonValue::Null))
    }

    /// Projects the tree below `sk` straight into `T`.
    pub fn get_key_as<T: DeserializeOwned>(
        &self,
        sk: &StoreKey,
        opt: JsonOptions,
    ) -> Result<T, ClientError> {
        let data = self.get_key_as_json(sk, opt)?;
        Ok(serde_json::from_value(data).map_err(ValueError::from)?)
    }

    pub fn get_key_as_json_base64(
        &self,
        sk: &StoreKey,
        opt: JsonOptions,
    ) -> Result<String, ClientError> {
        let response = self.raw_command(&getjson_args(sk, true, opt))?;
        Ok(required_str(&response, "base64")?.to_string())
    }

    /// Stores `data` at `sk`, deleting any existing value, children and
    /// history there first.
    ///
    /// Returns whether an existing key was replaced, and the key's address.
    pub fn set_key_json<T: Serialize + ?Sized>(
        &self,
        sk: &StoreKey,
        data: &T,
        opt: JsonOptions,
    ) -> Result<(bool, Option<StoreAddress>), ClientError> {
        let args = command_args("setjson", sk, Payload::document(data)?, opt);
        Ok(replaced_and_address(&self.raw_command(&args)?))
    }

    pub fn set_key_json_base64(
        &self,
        sk: &StoreKey,
        b64: &str,
        opt: JsonOptions,
    ) -> Result<(bool, Option<StoreAddress>), ClientError> {
        let args = command_args("setjson", sk, Payload::Base64(b64), opt);
        Ok(replaced_and_address(&self.raw_command(&args)?))
    }

    /// Stores `data` at `sk` only if the key does not exist yet.
    ///
    /// Returns the new key's address, or `None` if nothing was created.
    pub fn create_key_json<T: Serialize + ?Sized>(
        &self,
        sk: &StoreKey,
        data: &T,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("createjson", sk, Payload::document(data)?, opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }

    pub fn create_key_json_base64(
        &self,
        sk: &StoreKey,
        b64: &str,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("createjson", sk, Payload::Base64(b64), opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }

    /// Replaces the value and children of `sk` with `data`, only if the key
    /// exists.
    ///
    /// Returns the key's address, or `None` if nothing was replaced.
    pub fn replace_key_json<T: Serialize + ?Sized>(
        &self,
        sk: &StoreKey,
        data: &T,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("replacejson", sk, Payload::document(data)?, opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }

    pub fn replace_key_json_base64(
        &self,
        sk: &StoreKey,
        b64: &str,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("replacejson", sk, Payload::Base64(b64), opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }

    /// Overlays `data` on the existing tree at `sk`.
    ///
    /// Each part of the document is written separately under one write lock,
    /// so this is slower than the other JSON writes.
    pub fn merge_key_json<T: Serialize + ?Sized>(
        &self,
        sk: &StoreKey,
        data: &T,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("mergejson", sk, Payload::document(data)?, opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }

    pub fn merge_key_json_base64(
        &self,
        sk: &StoreKey,
        b64: &str,
        opt: JsonOptions,
    ) -> Result<Option<StoreAddress>, ClientError> {
        let args = command_args("mergejson", sk, Payload::Base64(b64), opt);
        Ok(optional_address(&self.raw_command(&args)?, "address"))
    }
}
