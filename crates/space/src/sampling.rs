use ndarray::{s, Array, Array2, ShapeBuilder};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::{rand::Rng, rand_distr::Uniform, RandomExt};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Method used to draw points from a search space
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Sampling {
    /// Independent uniform draws
    #[default]
    Uniform,
    /// Classic Latin hypercube: one point per stratum in each dimension
    Lhs,
}

impl Sampling {
    /// Generates a (ns, nx)-shaped array of samples belonging to `[0., 1.)^nx`
    pub fn normalized_sample<R: Rng>(&self, ns: usize, nx: usize, rng: &mut R) -> Array2<f64> {
        match self {
            Sampling::Uniform => Array::random_using((ns, nx), Uniform::new(0., 1.), rng),
            Sampling::Lhs => classic_lhs(ns, nx, rng),
        }
    }
}

fn classic_lhs<R: Rng>(ns: usize, nx: usize, rng: &mut R) -> Array2<f64> {
    let cut = Array::linspace(0., 1., ns + 1);

    let rnd = Array::random_using((ns, nx).f(), Uniform::new(0., 1.), rng);
    let a = cut.slice(s![..ns]).to_owned();
    let b = cut.slice(s![1..(ns + 1)]);
    let c = &b - &a;
    let mut lhs = Array::zeros((ns, nx).f());
    for j in 0..nx {
        let mut d = (rnd.column(j).to_owned() * &c + &a).to_vec();
        d.shuffle(rng);
        lhs.column_mut(j).assign(&Array::from_vec(d));
    }
    lhs
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_lhs_one_point_per_stratum() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let ns = 8;
        let lhs = Sampling::Lhs.normalized_sample(ns, 3, &mut rng);
        assert_eq!(lhs.shape(), &[ns, 3]);
        for col in lhs.axis_iter(Axis(1)) {
            let mut strata: Vec<usize> = col.iter().map(|v| (v * ns as f64) as usize).collect();
            strata.sort();
            assert_eq!(strata, (0..ns).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_uniform_in_unit_cube() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let x = Sampling::Uniform.normalized_sample(50, 2, &mut rng);
        assert!(x.iter().all(|v| (0. ..1.).contains(v)));
    }
}
