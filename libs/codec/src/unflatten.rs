use hearth_types::{ByteStream, Value};
use serde_json::Value as Json;

use crate::date;
use crate::extensions::ReviveContext;
use crate::{
    value_to_target, Codec, CodecError, NativeRegistry, Result, HOLE, MAX_DEPTH, NAN, NATIVE_TAG,
    NEGATIVE_INFINITY, NEGATIVE_ZERO, POSITIVE_INFINITY, UNDEFINED,
};

pub(crate) struct Unflattener<'a> {
    codec: &'a Codec,
    natives: &'a dyn NativeRegistry,
    nodes: Vec<Json>,
    active: Vec<bool>,
    cx: ReviveContext,
    depth: usize,
}

impl<'a> Unflattener<'a> {
    pub(crate) fn new(
        codec: &'a Codec,
        natives: &'a dyn NativeRegistry,
        unbuffered: Option<ByteStream>,
    ) -> Self {
        Self {
            codec,
            natives,
            nodes: Vec::new(),
            active: Vec::new(),
            cx: ReviveContext::new(unbuffered),
            depth: 0,
        }
    }

    /// Decode `text`, handing back the unbuffered stream if nothing used it
    pub(crate) fn run(mut self, text: &str) -> Result<(Value, Option<ByteStream>)> {
        let value = match serde_json::from_str::<Json>(text)? {
            Json::Number(n) => {
                let index = n
                    .as_i64()
                    .filter(|i| *i < 0)
                    .ok_or_else(|| CodecError::malformed("root must be a sentinel or array", None))?;
                sentinel(index)?
            }
            Json::Array(nodes) if !nodes.is_empty() => {
                self.active = vec![false; nodes.len()];
                self.nodes = nodes;
                self.hydrate(0)?
            }
            _ => return Err(CodecError::malformed("expected a flattened array", None)),
        };
        Ok((value, self.cx.take_unbuffered()))
    }

    fn hydrate(&mut self, index: i64) -> Result<Value> {
        if index < 0 {
            return sentinel(index);
        }
        let position = index as usize;
        let node = self
            .nodes
            .get(position)
            .cloned()
            .ok_or_else(|| CodecError::malformed("index out of range", Some(position)))?;
        if self.active[position] {
            return Err(CodecError::malformed("cyclic reference", Some(position)));
        }
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CodecError::TooDeep { limit: MAX_DEPTH });
        }
        self.active[position] = true;

        let value = match node {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(
                n.as_f64()
                    .ok_or_else(|| CodecError::malformed("unrepresentable number", Some(position)))?,
            ),
            Json::String(s) => Value::String(s),
            Json::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, child) in map {
                    let child = child_index(&child, position)?;
                    entries.push((key, self.hydrate(child)?));
                }
                Value::Object(entries)
            }
            Json::Array(items) => match items.first() {
                Some(Json::String(tag)) => {
                    let tag = tag.clone();
                    self.hydrate_typed(&tag, &items[1..], position)?
                }
                _ => {
                    let mut values = Vec::with_capacity(items.len());
                    for child in &items {
                        let child = child_index(child, position)?;
                        values.push(self.hydrate(child)?);
                    }
                    Value::Array(values)
                }
            },
        };

        self.active[position] = false;
        self.depth -= 1;
        Ok(value)
    }

    fn hydrate_typed(&mut self, tag: &str, args: &[Json], position: usize) -> Result<Value> {
        match tag {
            "Date" => {
                let iso = args.first().and_then(Json::as_str).unwrap_or_default();
                if iso.is_empty() {
                    return Ok(Value::Date(f64::NAN));
                }
                let ms = date::parse_iso(iso).ok_or_else(|| {
                    CodecError::malformed(format!("invalid date {iso:?}"), Some(position))
                })?;
                Ok(Value::Date(ms))
            }
            "RegExp" => {
                let source = args
                    .first()
                    .and_then(Json::as_str)
                    .ok_or_else(|| CodecError::malformed("RegExp without source", Some(position)))?;
                let flags = args.get(1).and_then(Json::as_str).unwrap_or_default();
                Ok(Value::RegExp {
                    source: source.to_string(),
                    flags: flags.to_string(),
                })
            }
            "BigInt" => {
                let digits = args
                    .first()
                    .and_then(Json::as_str)
                    .ok_or_else(|| CodecError::malformed("BigInt without digits", Some(position)))?;
                let unsigned = digits.strip_prefix('-').unwrap_or(digits);
                if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(CodecError::malformed("invalid BigInt digits", Some(position)));
                }
                Ok(Value::BigInt(digits.to_string()))
            }
            "Map" => {
                if args.len() % 2 != 0 {
                    return Err(CodecError::malformed("Map with odd entry count", Some(position)));
                }
                let mut pairs = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    let key = self.hydrate(child_index(&pair[0], position)?)?;
                    let value = self.hydrate(child_index(&pair[1], position)?)?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            "Set" => {
                let mut members = Vec::with_capacity(args.len());
                for child in args {
                    members.push(self.hydrate(child_index(child, position)?)?);
                }
                Ok(Value::Set(members))
            }
            NATIVE_TAG => {
                let payload = self.payload(args, position)?;
                let target = value_to_target(&payload)?;
                self.natives.revive(target)
            }
            _ => {
                let codec = self.codec;
                let extension = codec.extension(tag).ok_or_else(|| CodecError::UnknownTag {
                    tag: tag.to_string(),
                    node: position,
                })?;
                let payload = self.payload(args, position)?;
                extension.revive(payload, &mut self.cx)
            }
        }
    }

    fn payload(&mut self, args: &[Json], position: usize) -> Result<Value> {
        let child = args
            .first()
            .ok_or_else(|| CodecError::malformed("extension without payload", Some(position)))?;
        let child = child_index(child, position)?;
        self.hydrate(child)
    }
}

fn child_index(json: &Json, position: usize) -> Result<i64> {
    json.as_i64()
        .ok_or_else(|| CodecError::malformed("child reference is not an index", Some(position)))
}

fn sentinel(index: i64) -> Result<Value> {
    match index {
        UNDEFINED | HOLE => Ok(Value::Undefined),
        NAN => Ok(Value::Number(f64::NAN)),
        POSITIVE_INFINITY => Ok(Value::Number(f64::INFINITY)),
        NEGATIVE_INFINITY => Ok(Value::Number(f64::NEG_INFINITY)),
        NEGATIVE_ZERO => Ok(Value::Number(-0.0)),
        other => Err(CodecError::malformed(format!("unknown sentinel {other}"), None)),
    }
}
