//! Built-in providers that need no external data.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rand::seq::IndexedRandom;
use serde_json::Value;

use super::args::ProviderArgs;
use super::{Provider, ProviderContext, value_text};
use crate::Result;
use crate::error::PgCloakError;
use crate::schema::ProviderSpec;

/// Random element of a fixed list.
#[derive(Debug)]
pub(crate) struct ChoiceProvider {
    values: Vec<Value>,
}

impl Provider for ChoiceProvider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        Ok(self
            .values
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

pub(crate) fn choice(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    Ok(Box::new(ChoiceProvider {
        values: args.required_list("values")?.to_vec(),
    }))
}

/// Always `NULL`.
#[derive(Debug)]
pub(crate) struct ClearProvider;

impl Provider for ClearProvider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

pub(crate) fn clear(_: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    Ok(Box::new(ClearProvider))
}

/// Identity.
#[derive(Debug)]
pub(crate) struct KeepProvider;

impl Provider for KeepProvider {
    fn alter_value(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

pub(crate) fn keep(_: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    Ok(Box::new(KeepProvider))
}

/// A fixed replacement; `value: null` is allowed and clears the column.
#[derive(Debug)]
pub(crate) struct SetProvider {
    value: Value,
}

impl Provider for SetProvider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        Ok(self.value.clone())
    }
}

pub(crate) fn set(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    let value = args
        .raw("value")
        .cloned()
        .ok_or_else(|| args.invalid("value", "argument is required"))?;
    Ok(Box::new(SetProvider { value }))
}

const DEFAULT_MASK_SIGN: &str = "X";

/// Replaces each character with `sign`.
#[derive(Debug)]
pub(crate) struct MaskProvider {
    sign: String,
}

impl Provider for MaskProvider {
    fn alter_value(&self, value: &Value) -> Result<Value> {
        let length = value_text(value).chars().count();
        Ok(Value::String(self.sign.repeat(length)))
    }
}

pub(crate) fn mask(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    let sign = args.string("sign")?.unwrap_or(DEFAULT_MASK_SIGN);
    if sign.is_empty() {
        return Err(args.invalid("sign", "must not be empty"));
    }
    Ok(Box::new(MaskProvider {
        sign: sign.to_string(),
    }))
}

const DEFAULT_MD5_NUMBER_LENGTH: u32 = 8;
const MAX_MD5_NUMBER_LENGTH: u32 = 19;

/// MD5 digest of the textual value.
#[derive(Debug)]
pub(crate) struct Md5Provider {
    /// `Some(10^n)` when a numeric result of at most `n` digits is wanted.
    modulus: Option<u128>,
}

impl Provider for Md5Provider {
    fn alter_value(&self, value: &Value) -> Result<Value> {
        let digest = md5::compute(value_text(value).as_bytes());
        let Some(modulus) = self.modulus else {
            return Ok(Value::String(format!("{:x}", digest)));
        };

        let number = u128::from_be_bytes(digest.0)
            .checked_rem(modulus)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| PgCloakError::provider("md5", "numeric digest out of range"))?;
        Ok(Value::from(number))
    }
}

pub(crate) fn md5(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    if !args.flag("as_number")?.unwrap_or(false) {
        return Ok(Box::new(Md5Provider { modulus: None }));
    }

    let length = match args.unsigned("as_number_length")? {
        None => DEFAULT_MD5_NUMBER_LENGTH,
        Some(n) => u32::try_from(n)
            .ok()
            .filter(|n| (1..=MAX_MD5_NUMBER_LENGTH).contains(n))
            .ok_or_else(|| {
                args.invalid(
                    "as_number_length",
                    format!("must be between 1 and {}", MAX_MD5_NUMBER_LENGTH),
                )
            })?,
    };
    Ok(Box::new(Md5Provider {
        modulus: 10u128.checked_pow(length),
    }))
}

/// Fresh random UUID, ignoring the input.
#[derive(Debug)]
pub(crate) struct Uuid4Provider;

impl Provider for Uuid4Provider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        Ok(Value::String(uuid::Uuid::new_v4().to_string()))
    }
}

pub(crate) fn uuid4(_: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    Ok(Box::new(Uuid4Provider))
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// A date, ignoring the input: the configured `value` or today's UTC date.
#[derive(Debug)]
pub(crate) struct DatetimeProvider {
    fixed: Option<NaiveDateTime>,
    format: String,
}

impl Provider for DatetimeProvider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        let moment = self.fixed.unwrap_or_else(|| Utc::now().naive_utc());
        Ok(Value::String(moment.format(&self.format).to_string()))
    }
}

fn parse_moment(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
}

pub(crate) fn datetime(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    let fixed = match args.string("value")? {
        None => None,
        Some(text) => Some(parse_moment(text).ok_or_else(|| {
            args.invalid(
                "value",
                format!("'{}' is not a YYYY-MM-DD date or ISO datetime", text),
            )
        })?),
    };
    let format = args.string("format")?.unwrap_or(DEFAULT_DATE_FORMAT);
    if format.trim().is_empty() {
        return Err(args.invalid("format", "must not be empty"));
    }
    if chrono::format::StrftimeItems::new(format).any(|item| matches!(item, chrono::format::Item::Error)) {
        return Err(args.invalid("format", format!("'{}' is not a valid date format", format)));
    }
    Ok(Box::new(DatetimeProvider {
        fixed,
        format: format.to_string(),
    }))
}
