//! Cross-platform bridging.
//!
//! - `uid`: canonical `client/id` room addresses
//! - `rooms`: static room groups and destination resolution
//! - `message`: the protocol-neutral [`BridgeMessage`]
//! - `hooks`: `bridge.send` / `bridge.sent` hook stages
//! - `paeeye`: the built-in "do not bridge" hook
//! - `engine`: dispatch, association recording, edit/delete propagation

pub mod engine;
pub mod hooks;
pub mod message;
pub mod paeeye;
pub mod rooms;
pub mod uid;

pub use engine::BridgeEngine;
pub use hooks::{delivery_log, HookRegistry, HookStage};
pub use paeeye::PaeeyeFilter;
pub use rooms::RoomRouter;
