pub mod constraints;
pub mod controller;
pub mod geodesy;
pub mod mask;
pub mod models;
pub mod physics;
pub mod route;
pub mod routemap;
pub mod router;
pub mod weather;
