// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Sub-batch reassembly and column order inference
//!
//! Large results arrive as several DATA frames sharing a request id, each
//! tagged with `subBatchSerial` and the declared `totalSubBatches`. A total
//! of zero means the result was not split at all.

use crate::message::{Response, Row};
use serde::de::{self, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Progress of a sub-batch collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assembly {
    /// Still waiting for fragments
    Incomplete,
    /// The first fragment seen carried no rows
    Empty,
    /// Every declared fragment is present
    Complete,
}

/// Fragments of one response, ordered by sub-batch serial
#[derive(Debug, Default, Clone)]
pub struct SubBatches {
    fragments: BTreeMap<i64, Response>,
    // Declared total and emptiness of the first fragment to arrive
    first_seen: Option<(i64, bool)>,
}

impl SubBatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fragment under its serial. A repeated serial replaces the
    /// earlier fragment and does not count twice.
    pub fn insert(&mut self, fragment: Response) {
        if self.first_seen.is_none() {
            self.first_seen = Some((fragment.total_sub_batches, fragment.data.is_empty()));
        }
        self.fragments.insert(fragment.sub_batch_serial, fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn status(&self) -> Assembly {
        match self.first_seen {
            None => Assembly::Incomplete,
            Some((_, true)) => Assembly::Empty,
            Some((total, false)) if total == 0 || self.fragments.len() as i64 == total => {
                Assembly::Complete
            }
            Some(_) => Assembly::Incomplete,
        }
    }

    /// Merge every fragment into one response
    ///
    /// Rows are concatenated by increasing serial. Metadata is taken from the
    /// highest-serial fragment, which is the one carrying the inferred keys.
    pub fn merge(self) -> Option<Response> {
        let keys = self
            .fragments
            .values()
            .rev()
            .find_map(|fragment| fragment.keys.clone());
        let row_count = self.fragments.values().map(|f| f.data.len()).sum();

        let mut data: Vec<Row> = Vec::with_capacity(row_count);
        let mut last = None;
        for (_, mut fragment) in self.fragments {
            data.append(&mut fragment.data);
            last = Some(fragment);
        }

        let mut merged = last?;
        merged.data = data;
        merged.keys = keys;
        Some(merged)
    }
}

#[derive(Deserialize)]
struct FirstRow {
    #[serde(default, deserialize_with = "first_element")]
    data: Option<Row>,
}

/// Decode only the first element of the `data` array and skip the rest
fn first_element<'de, D>(deserializer: D) -> Result<Option<Row>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FirstVisitor;

    impl<'de> Visitor<'de> for FirstVisitor {
        type Value = Option<Row>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an array of row objects")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let first = seq.next_element::<Row>()?;
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(first)
        }
    }

    deserializer.deserialize_any(FirstVisitor)
}

/// Infer column order from the first row of a raw response frame
///
/// The row is decoded into an order-preserving object, so the keys come back
/// exactly as the server wrote them regardless of value types. Only the
/// first-level keys are reported; keys of nested objects inside values are
/// never included. Returns `None` when there is no data.
pub fn extract_keys(raw: &[u8]) -> Option<Vec<String>> {
    match serde_json::from_slice::<FirstRow>(raw) {
        Ok(FirstRow { data: Some(row) }) => Some(row.keys().cloned().collect()),
        Ok(FirstRow { data: None }) => {
            debug!("No data found");
            None
        }
        Err(e) => {
            debug!(error = %e, "Error extracting keys from response data");
            None
        }
    }
}
