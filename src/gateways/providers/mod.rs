pub mod cod;
pub mod momo;
pub mod vnpay;
pub mod zalopay;

pub use cod::CodGateway;
pub use momo::{MomoConfig, MomoGateway};
pub use vnpay::{VnpayConfig, VnpayGateway};
pub use zalopay::{ZalopayConfig, ZalopayGateway};
