mod init_db;
mod run;
mod sensors;

pub use init_db::init_db;
pub use run::run;
pub use sensors::{add_sensor, attempts, set_watermark};
