mod boundary;
mod utils;
