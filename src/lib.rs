//! # vps-storefront
//!
//! Order, payment and provisioning core of a VPS storefront.
//!
//! Customers fill a cart, check out into orders and pay from their wallet
//! or offline. Approved orders are fulfilled by background workers that
//! provision, resize, renew and refund instances through an automation
//! backend. Every order status change is applied with a compare-and-set
//! inside one transaction and appended to the order's event log.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP), payment provider, automation backend
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── OrderService, VpsService, CouponService,
//!     │   WalletService, CartService (service/)
//!     ├── Scheduler workers (service/scheduler)
//!     ├── EventBus (domain/)
//!     │
//!     ├── Automation / Payment / Notifier (collaborator/)
//!     │
//!     └── EntityStore over SQLite or PostgreSQL (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod collaborator;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
