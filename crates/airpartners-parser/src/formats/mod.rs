mod common;
mod export;
mod iem;

pub use common::{parse_timestamp_micros, parse_wall_clock_micros};
pub use export::{parse_export, TableSpec};
pub use iem::{
    parse_iem_response, IEM_TIMESTAMP_COLUMN, IEM_WIND_DIR_COLUMN, IEM_WIND_SPEED_COLUMN,
};
