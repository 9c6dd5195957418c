pub mod cache;
pub mod credentials;
pub mod forecast;
pub mod geo;
pub mod geocode;
pub mod gpx;
pub mod openweather;
pub mod resample;
pub mod status;
pub mod timing;
pub mod trips;
pub mod weather;
