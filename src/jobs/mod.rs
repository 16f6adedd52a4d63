pub mod cart_reaper;

pub use cart_reaper::{ReapReport, reap_carts, spawn_cart_reaper};
