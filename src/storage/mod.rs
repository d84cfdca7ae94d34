//! SQLite-backed business entities: users, stores, products, payments, orders.

pub mod db;
pub mod migrations;
pub mod orders;
pub mod payments;
pub mod products;
pub mod stores;
pub mod users;

// Re-exports for convenience
pub use db::{create_pool, get_connection, Database, DbConnection, DbPool};
pub use orders::{HubStats, NewOrder, Order, OrderStatus};
pub use payments::{NewPayment, Payment, PaymentStatus};
pub use products::{NewProduct, Product, ProductCreation};
pub use stores::{NewStore, Store, StoreCreation};
pub use users::User;
