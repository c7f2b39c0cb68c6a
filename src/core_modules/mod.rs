// Detection and tracking building blocks, bottom-up:
// geometry -> blob -> blob_detector, and association + kalman -> trackers -> tracking.

pub mod association;
pub mod blob;
pub mod blob_detector;
pub mod byte_tracker;
pub mod geometry;
pub mod kalman;
pub mod tracker;
pub mod tracking;
