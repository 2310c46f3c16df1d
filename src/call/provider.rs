use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::CallState;
use crate::value::{ValueDeserializer, ValueEntity, ValueSerializer, ValueUpdateMode};

/// Context of one provider-side method invocation, handed to the provider
/// callback. The input parameters are the request payload and are immutable;
/// whatever the callback serializes into the output parameters becomes the
/// response.
pub struct ProviderCallContext {
    input_parameters: ValueEntity,
    output_parameters: ValueEntity,
    outputs_serialized: Arc<AtomicBool>,
}

impl ProviderCallContext {
    pub(crate) fn new(input_data: Vec<u8>) -> Self {
        let input_parameters = ValueEntity::new();
        input_parameters.set_data(input_data);

        // Any write landing in the output buffer flips the flag, including
        // writes through the serializer guard.
        let output_parameters = ValueEntity::new();
        let outputs_serialized = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&outputs_serialized);
        output_parameters.register_callback(
            Arc::new(move |_| flag.store(true, Ordering::SeqCst)),
            ValueUpdateMode::OnUpdate,
        );

        Self {
            input_parameters,
            output_parameters,
            outputs_serialized,
        }
    }

    /// A provider context is conceptually always in the `Called` state.
    pub fn call_state(&self) -> CallState {
        CallState::Called
    }

    pub fn input_deserializer(&self) -> ValueDeserializer<'_> {
        self.input_parameters.deserializer()
    }

    /// Serializer for the response: the return value first, then any output
    /// parameters.
    pub fn output_serializer(&self) -> ValueSerializer<'_> {
        self.output_parameters.serializer()
    }

    pub fn output_deserializer(&self) -> ValueDeserializer<'_> {
        self.output_parameters.deserializer()
    }

    /// `true` once any write landed in the output parameters.
    pub fn outputs_serialized(&self) -> bool {
        self.outputs_serialized.load(Ordering::SeqCst)
    }

    pub(crate) fn input_data(&self) -> Vec<u8> {
        self.input_parameters.copy_data()
    }

    pub(crate) fn output_data(&self) -> Vec<u8> {
        self.output_parameters.copy_data()
    }

    /// Replaces the output buffer wholesale; counts as serializing outputs.
    pub(crate) fn set_output_data(&self, data: Vec<u8>) {
        self.output_parameters.set_data(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_the_request_payload_and_no_outputs() {
        let ctx = ProviderCallContext::new(vec![0x7B]);
        assert_eq!(ctx.input_data(), vec![0x7B]);
        assert!(!ctx.outputs_serialized());
        assert_eq!(ctx.call_state(), CallState::Called);
    }

    #[test]
    fn serializing_outputs_sets_the_flag() {
        let ctx = ProviderCallContext::new(Vec::new());
        let mut ser = ctx.output_serializer();
        ser.write_u8(123, 8);
        ser.end();
        assert!(ctx.outputs_serialized());
        assert_eq!(ctx.output_data(), vec![123]);
    }

    #[test]
    fn an_empty_committed_response_still_counts_as_serialized() {
        let ctx = ProviderCallContext::new(Vec::new());
        ctx.output_serializer().end();
        assert!(ctx.outputs_serialized());
        assert!(ctx.output_data().is_empty());
    }

    #[test]
    fn replacing_the_output_buffer_counts_as_serialized() {
        let ctx = ProviderCallContext::new(Vec::new());
        ctx.set_output_data(vec![1, 2]);
        assert!(ctx.outputs_serialized());
        assert_eq!(ctx.output_data(), vec![1, 2]);
    }
}
