#[cfg(feature = "grib")]
pub mod grib;
pub mod polars;
pub mod zones;
