//! Commonly used items, re-exported for a single wildcard import.

pub use crate::call::{CallState, ConsumerCallContext, ProviderCallContext};
pub use crate::error::{AdapterError, Result};
pub use crate::member::{
    ConsumedData, ConsumedEvent, ConsumedField, ConsumedMethod, Direction, MemberKind,
    ProvidedData, ProvidedEvent, ProvidedField, ProvidedMethod, ProviderCallback, TxTrigger,
};
pub use crate::object::{DistributedObject, InstContainer, InstContainerElement};
pub use crate::service::{ClaService, DEFAULT_PARTICIPANT_NAME};
pub use crate::transport::{Participant, ParticipantConfig, ParticipantFactory};
pub use crate::value::{CallbackHandle, ValueEntity, ValueUpdateMode};
