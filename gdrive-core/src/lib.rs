mod client;
mod ids;
mod oauth;
mod request;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList, FileMetadata,
};
pub use ids::validate_folder_id;
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
pub use request::{MAX_PAGE_SIZE, RequestSpec};
