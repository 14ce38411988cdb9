mod store;

pub use store::{ENV_BASE_URL, ENV_STORAGE, PROJECT_CONFIG_FILE, StoreConfig};
