//! Posts and profile pictures, the consumers of uploaded media.

mod model;
mod service;

pub use model::{CreatePost, PostRecord, PostResponse, ProfilePicture, SetProfilePicture};
pub use service::PostService;
