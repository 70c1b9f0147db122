pub mod codec;
pub mod context;
pub mod engine;
pub mod events;
pub mod store;

pub use codec::{Codec, CodecError, ShiftCodec};
pub use context::PersistContext;
pub use engine::{
    EngineError, EngineHandle, EngineId, EngineKind, FileEngine, MemoryEngine, StorageEngine,
    SupportReport,
};
pub use events::{ChangeBus, ChangeEvent, ListenerHub, ListenerToken, NativeChangeEvent};
pub use store::{
    BatchPersistStore, KeySpace, OpOptions, Persist, PersistError, PersistStore, StoreConfig,
};
