pub mod db;
pub mod json_path;
pub mod logging;
