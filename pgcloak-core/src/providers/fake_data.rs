//! `fake.*` providers backed by the `fake` crate.
//!
//! `fake.<generator>` produces a random value from the named generator;
//! `fake.unique.<generator>` never repeats a value within one provider
//! instance, i.e. within one field of one table run.

use std::collections::HashSet;
use std::sync::Mutex;

use fake::Fake;
use fake::faker::address::en::{
    BuildingNumber, CityName, CountryName, PostCode, StateName, StreetName, ZipCode,
};
use fake::faker::company::en::{CompanyName, Industry};
use fake::faker::internet::en::{FreeEmail, IPv4, IPv6, SafeEmail, UserAgent, Username};
use fake::faker::job::en::Title as JobTitle;
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::{CellNumber, PhoneNumber};
use serde_json::Value;

use super::args::ProviderArgs;
use super::{Provider, ProviderContext};
use crate::Result;
use crate::error::PgCloakError;
use crate::schema::ProviderSpec;

const PREFIX: &str = "fake.";
const UNIQUE_PREFIX: &str = "unique.";

/// Attempts before a unique generator is considered exhausted.
const MAX_UNIQUE_ATTEMPTS: usize = 1000;

type Generator = fn() -> String;

static GENERATORS: &[(&str, Generator)] = &[
    ("first_name", || FirstName().fake::<String>()),
    ("last_name", || LastName().fake::<String>()),
    ("name", || Name().fake::<String>()),
    ("user_name", || Username().fake::<String>()),
    ("email", || SafeEmail().fake::<String>()),
    ("safe_email", || SafeEmail().fake::<String>()),
    ("free_email", || FreeEmail().fake::<String>()),
    ("phone_number", || PhoneNumber().fake::<String>()),
    ("cell_number", || CellNumber().fake::<String>()),
    ("city", || CityName().fake::<String>()),
    ("street_name", || StreetName().fake::<String>()),
    ("building_number", || BuildingNumber().fake::<String>()),
    ("zipcode", || ZipCode().fake::<String>()),
    ("postcode", || PostCode().fake::<String>()),
    ("state", || StateName().fake::<String>()),
    ("country", || CountryName().fake::<String>()),
    ("company", || CompanyName().fake::<String>()),
    ("industry", || Industry().fake::<String>()),
    ("job", || JobTitle().fake::<String>()),
    ("word", || Word().fake::<String>()),
    ("sentence", || Sentence(3..8).fake::<String>()),
    ("paragraph", || Paragraph(1..3).fake::<String>()),
    ("ipv4", || IPv4().fake::<String>()),
    ("ipv6", || IPv6().fake::<String>()),
    ("user_agent", || UserAgent().fake::<String>()),
];

/// Names accepted after `fake.` (and `fake.unique.`).
pub fn generator_names() -> impl Iterator<Item = &'static str> {
    GENERATORS.iter().map(|(name, _)| *name)
}

fn lookup(name: &str) -> Option<Generator> {
    GENERATORS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, generator)| *generator)
}

#[derive(Debug)]
pub(crate) struct FakeProvider {
    name: String,
    generator: Generator,
    /// Values handed out so far, for `fake.unique.*`.
    seen: Option<Mutex<HashSet<String>>>,
}

impl FakeProvider {
    fn unique_value(&self, seen: &Mutex<HashSet<String>>) -> Result<Value> {
        let mut seen = seen
            .lock()
            .map_err(|_| PgCloakError::provider(&self.name, "unique value set is poisoned"))?;
        for _ in 0..MAX_UNIQUE_ATTEMPTS {
            let candidate = (self.generator)();
            if seen.insert(candidate.clone()) {
                return Ok(Value::String(candidate));
            }
        }
        Err(PgCloakError::provider(
            &self.name,
            format!(
                "no new unique value after {} attempts ({} values issued)",
                MAX_UNIQUE_ATTEMPTS,
                seen.len()
            ),
        ))
    }
}

impl Provider for FakeProvider {
    fn alter_value(&self, _value: &Value) -> Result<Value> {
        match &self.seen {
            Some(seen) => self.unique_value(seen),
            None => Ok(Value::String((self.generator)())),
        }
    }
}

pub(crate) fn fake(spec: &ProviderSpec, _: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    let sub_name = spec.name.strip_prefix(PREFIX).unwrap_or_default();
    let (unique, generator_name) = match sub_name.strip_prefix(UNIQUE_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, sub_name),
    };

    let generator = lookup(generator_name).ok_or_else(|| {
        args.invalid(
            "name",
            format!(
                "'{}' is not a known fake data generator (known: {})",
                generator_name,
                generator_names().collect::<Vec<_>>().join(", ")
            ),
        )
    })?;

    Ok(Box::new(FakeProvider {
        name: spec.name.clone(),
        generator,
        seen: unique.then(|| Mutex::new(HashSet::new())),
    }))
}
