// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered option maps for the MPI launcher, the simulation program and the
//! scheduler, and the merge rule that layers user values over defaults.
use serde::Deserialize;
use serde::Deserializer;
use serde::de::MapAccess;
use serde::de::Visitor;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The value half of an option entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
  /// Bare flag, written as the key alone (`null` in JSON).
  Flag,
  /// Rendered as `key value`.
  Value(String),
  /// Rendered as the key followed by every element, e.g. an index variable.
  List(Vec<String>),
}

impl From<&str> for ArgValue {
  fn from(value: &str) -> Self {
    ArgValue::Value(value.to_string())
  }
}

impl From<String> for ArgValue {
  fn from(value: String) -> Self {
    ArgValue::Value(value)
  }
}

impl From<u32> for ArgValue {
  fn from(value: u32) -> Self {
    ArgValue::Value(value.to_string())
  }
}

impl<S: Into<String>> From<Vec<S>> for ArgValue {
  fn from(values: Vec<S>) -> Self {
    ArgValue::List(values.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
  fn from(value: Option<T>) -> Self {
    value.map_or(ArgValue::Flag, Into::into)
  }
}

impl TryFrom<Value> for ArgValue {
  type Error = String;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    match value {
      Value::Null => Ok(ArgValue::Flag),
      Value::Array(items) => items
        .into_iter()
        .map(scalar_text)
        .collect::<Result<Vec<_>, _>>()
        .map(ArgValue::List),
      other => scalar_text(other).map(ArgValue::Value),
    }
  }
}

fn scalar_text(value: Value) -> Result<String, String> {
  match value {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    Value::Bool(b) => Ok(b.to_string()),
    other => Err(format!("unsupported option value: {}", other)),
  }
}

/// An insertion-ordered option map.
///
/// Re-inserting an existing key replaces its value where it stands, so the
/// position established by the first insert never moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap {
  entries: Vec<(String, ArgValue)>,
}

impl ArgMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts or replaces `key`, returning the previous value.
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Option<ArgValue> {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, slot)) => Some(std::mem::replace(slot, value)),
      None => {
        self.entries.push((key, value));
        None
      }
    }
  }

  /// Builder form of [`ArgMap::insert`].
  pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn get(&self, key: &str) -> Option<&ArgValue> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  pub fn remove(&mut self, key: &str) -> Option<ArgValue> {
    let index = self.entries.iter().position(|(k, _)| k == key)?;
    Some(self.entries.remove(index).1)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }

  /// Renders the map as command-line words.
  ///
  /// `Value` entries are split on whitespace so that
  /// `"-pk": "kokkos newton on"` becomes four words.
  pub fn flatten(&self) -> Vec<String> {
    let mut words = Vec::new();
    for (key, value) in &self.entries {
      words.push(key.clone());
      match value {
        ArgValue::Flag => {}
        ArgValue::Value(v) => words.extend(v.split_whitespace().map(str::to_string)),
        ArgValue::List(items) => words.extend(items.iter().cloned()),
      }
    }
    words
  }

  /// Renders the map as input-script variable definitions,
  /// `-var NAME VALUE` per entry. Values are kept as single words.
  pub fn to_variable_args(&self) -> Vec<String> {
    let mut words = Vec::new();
    for (name, value) in &self.entries {
      words.push("-var".to_string());
      words.push(name.clone());
      match value {
        ArgValue::Flag => {}
        ArgValue::Value(v) => words.push(v.clone()),
        ArgValue::List(items) => words.extend(items.iter().cloned()),
      }
    }
    words
  }
}

/// Layers `overrides` over `defaults`.
///
/// Keys of `defaults` keep their order; keys only present in `overrides`
/// follow in their own order. A shared key takes the override's value whole,
/// including a `Flag`.
pub fn merge(defaults: &ArgMap, overrides: &ArgMap) -> ArgMap {
  let mut merged = defaults.clone();
  for (key, value) in overrides.iter() {
    merged.insert(key, value.clone());
  }
  merged
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for ArgMap {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut map = ArgMap::new();
    for (key, value) in iter {
      map.insert(key, value);
    }
    map
  }
}

impl<'de> Deserialize<'de> for ArgMap {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct ArgMapVisitor;

    impl<'de> Visitor<'de> for ArgMapVisitor {
      type Value = ArgMap;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of option names to null, scalars or lists of scalars")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ArgMap, A::Error> {
        let mut map = ArgMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
          let value = ArgValue::try_from(value).map_err(serde::de::Error::custom)?;
          map.insert(key, value);
        }
        Ok(map)
      }
    }

    deserializer.deserialize_map(ArgMapVisitor)
  }
}

impl FromStr for ArgMap {
  type Err = serde_json::Error;

  /// Parses a JSON object, keeping the order keys were written in.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    serde_json::from_str(s)
  }
}
