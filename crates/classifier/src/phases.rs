pub(crate) mod behavior;
pub(crate) mod cex;
pub(crate) mod dex;
pub(crate) mod mega_whale;
pub(crate) mod phase;
