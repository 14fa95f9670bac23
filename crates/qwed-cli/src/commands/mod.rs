pub(crate) mod compile;
pub(crate) mod helpers;
pub(crate) mod verify;
