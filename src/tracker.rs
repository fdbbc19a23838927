//! Multi-object tracking: detections in, persistent tracks out.

mod embedding;
mod frame;
mod kalman_filter;
mod matching;
mod rect;
mod track;
mod track_manager;
mod track_state;

pub use embedding::{Centroid, Embedding};
pub use frame::{Detection, Frame, ObjectClass, normalize_plate};
pub use kalman_filter::{KalmanFilter, MotionState};
pub use matching::{AssignmentResult, Candidate, ClassWeights, cost_matrix, linear_assignment};
pub use rect::{Rect, iou_batch};
pub use track::{Observation, PlateSighting, Track, TrackId, TrackIdAllocator};
pub use track_manager::{TrackManager, TrackUpdate, TrackerConfig, UpdateKind};
pub use track_state::TrackState;
