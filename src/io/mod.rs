//! Persistence: binary vectors and matrices, input archives, solution and
//! metadata output.

mod archive;
mod matrix_io;
mod solution;

pub use archive::{
    format_ranges, parse_ranges, read_archive, write_archive, InversionInputs, EQUALITY_DATA,
    EQUALITY_MATRIX, INEQUALITY_DATA, INEQUALITY_MATRIX, INITIAL, RANGES,
};
pub use matrix_io::{
    decode_matrix, decode_vector, encode_matrix, encode_vector, read_matrix, read_vector,
    write_matrix, write_vector,
};
pub use solution::{metadata_path, strip_bin, write_solution, RunMetadata};
