pub mod csv_io;
pub mod db;
pub mod forecast;
pub mod models;
pub mod openfoodfacts;
pub mod regression;
pub mod service;
