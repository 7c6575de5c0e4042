//! Player pipeline
//!
//! ```text
//! RangeFetcher → EbmlDemuxer → ChunkAssembler → FrameDecoder → FadeTransform → FlowGate → consumer
//!     Bytes        Element        Assembled       DecodedFrame    DecodedFrame
//! ```

pub mod assemble_stage;
pub mod coordinator;
pub mod decode_stage;
pub mod fade_stage;
pub mod valve_stage;

pub use assemble_stage::{Assembled, ChunkAssembler};
pub use coordinator::{PlayerCoordinator, PlayerInstance, SourceRequest};
pub use decode_stage::{FrameDecoder, ReorderQueue};
pub use fade_stage::{FadeControl, FadeOptions, FadeTransform};
pub use valve_stage::{FlowGate, GateHandle, GateState, ReducingValve};
