pub mod errors;
pub mod formats;

pub use errors::ParserError;
pub use formats::{
    parse_export, parse_iem_response, parse_timestamp_micros, parse_wall_clock_micros, TableSpec,
    IEM_TIMESTAMP_COLUMN, IEM_WIND_DIR_COLUMN, IEM_WIND_SPEED_COLUMN,
};

#[cfg(test)]
mod tests;
