pub mod codes;
pub mod hash;
pub mod html;
pub mod jwt;
pub mod pagination;
pub mod sessions;
pub mod tenant;
