pub mod file_paths;
pub mod paths;

pub use file_paths::extract_file_paths;
pub use paths::{
    config_path, data_dir, database_path, init_data_dir, log_file_path, logs_dir,
};
