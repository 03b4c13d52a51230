pub mod booli;
pub mod traits;

pub use booli::BooliSource;
pub use traits::SiteSource;
