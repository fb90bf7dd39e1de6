// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::hash::BuildHasher;
use std::marker::PhantomData;

use crate::{FibMapEntry, JsonMap, LikeEquals};

struct MapVisitor<V, S> {
    _marker: PhantomData<JsonMap<V, S>>,
}

impl<V, S> Serialize for JsonMap<V, S>
where
    V: Serialize,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        let guard = &crossbeam_epoch::pin();

        serializer.collect_map(
            self.iter(guard)
                .map(FibMapEntry::into_pair)
                .map(|(key, value)| (&**key, value)),
        )
    }
}

impl<'de, V, S> Deserialize<'de> for JsonMap<V, S>
where
    V: Deserialize<'de> + LikeEquals + Clone,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(MapVisitor::new())
    }
}

impl<V, S> MapVisitor<V, S> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<'de, V, S> Visitor<'de> for MapVisitor<V, S>
where
    V: Deserialize<'de> + LikeEquals + Clone,
    S: Default + BuildHasher,
{
    type Value = JsonMap<V, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let values = JsonMap::with_hasher(S::default());

        while let Some((key, value)) = access.next_entry::<String, V>()? {
            values.insert(&key, value);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value};

    use crate::{Expected, FibMap, JsonMap, PutResult};

    #[test]
    fn test_map() {
        let map: JsonMap<Value> = JsonMap::new();

        map.insert("a", json!(1));
        map.insert("b", json!({ "nested": [true, null] }));

        let serialized = serde_json::to_value(&map).unwrap();
        assert_eq!(serialized, json!({ "a": 1, "b": { "nested": [true, null] } }));

        let deserialized: JsonMap<Value> = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized.len(), 2);
        assert_eq!(deserialized.get("a"), Some(json!(1)));
        assert_eq!(deserialized.get("b"), map.get("b"));
    }

    #[test]
    fn null_counts_as_void() {
        let map: FibMap<String, Value> = FibMap::new();
        map.insert("k".to_owned(), Value::Null);

        assert_eq!(
            map.put("k".to_owned(), Expected::Void, Some(json!("set")), true),
            PutResult::Previous(Value::Null)
        );
        assert!(map
            .put("k".to_owned(), Expected::Void, Some(json!("again")), true)
            .is_conflict());
        assert_eq!(map.get("k"), Some(json!("set")));
    }
}
