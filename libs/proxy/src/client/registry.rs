//! Host-side reference handling for the codec

use hearth_codec::{CodecError, NativeRegistry};
use hearth_types::{NativeTarget, Value};
use std::panic::Location;
use std::sync::Arc;

use super::stub::{MethodStub, Stub};
use super::Bridge;

/// Turns stubs into targets on the way out, and targets into stubs (or
/// pending results) on the way in
pub(crate) struct HostRegistry {
    pub bridge: Arc<Bridge>,
    /// Host call site that started the operation, used for error stacks
    pub caller: &'static Location<'static>,
}

impl NativeRegistry for HostRegistry {
    fn reduce(&self, value: &Value) -> hearth_codec::Result<Option<NativeTarget>> {
        let Value::Native(native) = value else {
            return Ok(None);
        };
        if let Some(stub) = native.as_any().downcast_ref::<Stub>() {
            if stub.is_poisoned() {
                return Err(CodecError::native(format!(
                    "cannot pass poisoned stub to {}",
                    stub.type_name()
                )));
            }
            return Ok(Some(stub.target().clone()));
        }
        if native.as_any().is::<MethodStub>() {
            return Err(CodecError::native("methods cannot be passed as arguments"));
        }
        Ok(None)
    }

    fn revive(&self, target: NativeTarget) -> hearth_codec::Result<Value> {
        if target.is_pending() {
            return Ok(Value::Promise(self.bridge.resolve_pending(target, self.caller)));
        }
        Ok(Value::Native(Stub::new(self.bridge.clone(), target)))
    }
}
