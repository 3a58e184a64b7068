//! Stage composers: [`Script`] runs stages in sequence, [`Line`] chains them
//! through junctions.

mod line;
mod script;

pub use line::Line;
pub use script::Script;
