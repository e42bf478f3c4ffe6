//! Catalog domain module (event-sourced).
//!
//! Farmer listings and their two stock pools. Pure domain logic: no IO, no HTTP,
//! no storage. Reservation and release are commands on the product aggregate, so
//! a pool can only change through its own event stream.

pub mod pool;
pub mod product;

pub use pool::{StockPool, pool_for};
pub use product::{
    AllocateStock, ListProduct, ListingRevised, Product, ProductCommand, ProductEvent, ProductId,
    ProductListed, ReleaseStock, ReserveStock, ReviseListing, StockAllocated, StockReleased,
    StockReserved, Unit,
};
