pub mod ids;
pub mod params;
