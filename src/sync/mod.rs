//! Workout synchronization between the local store and the Pod

pub mod local;
pub mod media;
pub mod reconciler;
pub mod remote;

pub use self::{
    local::{SledWorkoutStore, WorkoutStore},
    media::{FsMediaSource, MediaBlob, MediaSource, MemoryMediaSource},
    reconciler::{merge, MediaRequest, SyncEngine, SyncEvent},
    remote::{RemoteDataSource, SnapshotCache},
};
