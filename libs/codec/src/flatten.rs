use hearth_types::Value;
use serde_json::{Map, Number, Value as Json};

use crate::date;
use crate::extensions::ReduceContext;
use crate::{
    target_to_value, Codec, CodecError, Encoded, NativeRegistry, Result, StreamMode, MAX_DEPTH,
    NAN, NATIVE_TAG, NEGATIVE_INFINITY, NEGATIVE_ZERO, POSITIVE_INFINITY, UNDEFINED,
};

/// Largest integer a double holds exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) struct Flattener<'a> {
    codec: &'a Codec,
    natives: &'a dyn NativeRegistry,
    nodes: Vec<Json>,
    cx: ReduceContext,
    depth: usize,
}

impl<'a> Flattener<'a> {
    pub(crate) fn new(codec: &'a Codec, natives: &'a dyn NativeRegistry, mode: StreamMode) -> Self {
        Self {
            codec,
            natives,
            nodes: Vec::new(),
            cx: ReduceContext::new(mode),
            depth: 0,
        }
    }

    pub(crate) fn run(mut self, value: &Value) -> Result<Encoded> {
        let root = self.flatten(value)?;
        let text = if root < 0 {
            root.to_string()
        } else {
            serde_json::to_string(&Json::Array(self.nodes))?
        };
        Ok(Encoded {
            text,
            unbuffered_stream: self.cx.into_unbuffered(),
        })
    }

    fn flatten(&mut self, value: &Value) -> Result<i64> {
        if let Some(sentinel) = sentinel(value) {
            return Ok(sentinel);
        }
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CodecError::TooDeep { limit: MAX_DEPTH });
        }

        let index = self.nodes.len();
        self.nodes.push(Json::Null);
        let node = match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::BigInt(digits) => typed("BigInt", vec![Json::String(digits.clone())]),
            Value::Array(items) => {
                let mut indices = Vec::with_capacity(items.len());
                for item in items {
                    indices.push(Json::from(self.flatten(item)?));
                }
                Json::Array(indices)
            }
            Value::Object(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    let child = self.flatten(item)?;
                    map.insert(key.clone(), Json::from(child));
                }
                Json::Object(map)
            }
            Value::Date(ms) => typed("Date", vec![Json::String(date::to_iso(*ms))]),
            Value::RegExp { source, flags } => typed(
                "RegExp",
                vec![Json::String(source.clone()), Json::String(flags.clone())],
            ),
            Value::Map(pairs) => {
                let mut items = Vec::with_capacity(pairs.len() * 2);
                for (key, item) in pairs {
                    items.push(Json::from(self.flatten(key)?));
                    items.push(Json::from(self.flatten(item)?));
                }
                typed("Map", items)
            }
            Value::Set(members) => {
                let mut items = Vec::with_capacity(members.len());
                for member in members {
                    items.push(Json::from(self.flatten(member)?));
                }
                typed("Set", items)
            }
            other => self.reduce(other)?,
        };
        self.nodes[index] = node;
        self.depth -= 1;
        Ok(index as i64)
    }

    fn reduce(&mut self, value: &Value) -> Result<Json> {
        let codec = self.codec;
        for extension in codec.extensions() {
            if let Some(payload) = extension.reduce(value, &mut self.cx)? {
                let child = self.flatten(&payload)?;
                return Ok(typed(extension.tag(), vec![Json::from(child)]));
            }
        }
        match self.natives.reduce(value)? {
            Some(target) => {
                let child = self.flatten(&target_to_value(&target))?;
                Ok(typed(NATIVE_TAG, vec![Json::from(child)]))
            }
            None => Err(CodecError::Unserializable {
                type_label: value.type_label().to_string(),
            }),
        }
    }
}

fn sentinel(value: &Value) -> Option<i64> {
    match value {
        Value::Undefined => Some(UNDEFINED),
        Value::Number(n) if n.is_nan() => Some(NAN),
        Value::Number(n) if *n == f64::INFINITY => Some(POSITIVE_INFINITY),
        Value::Number(n) if *n == f64::NEG_INFINITY => Some(NEGATIVE_INFINITY),
        Value::Number(n) if *n == 0.0 && n.is_sign_negative() => Some(NEGATIVE_ZERO),
        _ => None,
    }
}

fn typed(tag: &str, mut items: Vec<Json>) -> Json {
    items.insert(0, Json::String(tag.to_string()));
    Json::Array(items)
}

fn number(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        // Finite values only reach this point
        Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}
