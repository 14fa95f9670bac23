pub mod process;
pub mod smtlib_printer;
