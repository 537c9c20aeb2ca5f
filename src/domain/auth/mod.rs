pub mod cache;
pub mod local_list;
pub mod pipeline;

pub use cache::{AuthCache, AuthCacheEntry};
pub use local_list::LocalAuthList;
pub use pipeline::{AuthContext, AuthPipeline, AuthStatus, AuthVerdict};
