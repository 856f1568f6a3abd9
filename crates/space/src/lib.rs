/*!
This library describes the search space of an optimization problem and
implements the sampling methods used to draw starting points from it.

A search space is an ordered list of typed variables, each one given by an [`XType`]:
continuous (`Float`), integer (`Int`), ordered levels (`Ord`) or categorical (`Enum`).
Points of the space are always handled as `f64` arrays; non continuous components hold
integer values, one of the ordered levels or the index of the category.

Example:
```
use acqopt_space::{Sampling, SearchSpace, XType};

let space = SearchSpace::new(&[XType::Float(-5., 5.), XType::Int(0, 10), XType::Enum(3)])
    .expect("valid space")
    .with_seed(42);
// Five points drawn uniformly
let x = space.sample(5, Sampling::Uniform);
assert_eq!(x.shape(), &[5, 3]);
// or else using a Latin hypercube design
let x = space.sample(5, Sampling::Lhs);
assert!(x.rows().into_iter().all(|xi| space.contains(&xi)));
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod sampling;
mod space;
mod xtype;

pub use errors::*;
pub use sampling::*;
pub use space::*;
pub use xtype::*;
