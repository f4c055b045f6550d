use nalgebra::{Matrix2, Vector2};

const N_SAMPLES: usize = 300;
const MAX_ITER: usize = 200;

/// Fits `a`, `b` of the low-dimensional similarity `1 / (1 + a·x^(2b))`.
///
/// The target curve is 1 up to `min_dist` and decays as `exp(-(x - min_dist) / spread)`
/// beyond it, sampled on `[0, 3·spread]`. Solved by damped Gauss-Newton
/// (Levenberg-Marquardt) from `a = b = 1`.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..N_SAMPLES)
        .map(|i| 3.0 * spread * i as f64 / (N_SAMPLES - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let cost = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0, 1.0);
    let mut current = cost(a, b);
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITER {
        let mut jtj = Matrix2::<f64>::zeros();
        let mut jtr = Vector2::<f64>::zeros();
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = 1.0 + a * u;
            let r = 1.0 / denom - y;
            let j = Vector2::new(-u / (denom * denom), -2.0 * a * u * x.ln() / (denom * denom));
            jtj += j * j.transpose();
            jtr += j * r;
        }

        let mut damped = jtj;
        damped[(0, 0)] *= 1.0 + lambda;
        damped[(1, 1)] *= 1.0 + lambda;
        let Some(inverse) = damped.try_inverse() else {
            lambda *= 10.0;
            continue;
        };
        let delta = -(inverse * jtr);
        let (na, nb) = (a + delta[0], b + delta[1]);

        if na > 0.0 && nb > 0.0 {
            let candidate = cost(na, nb);
            if candidate < current {
                a = na;
                b = nb;
                current = candidate;
                lambda = (lambda / 10.0).max(1e-12);
                if delta.norm() < 1e-10 {
                    break;
                }
                continue;
            }
        }
        lambda *= 10.0;
        if lambda > 1e12 {
            break;
        }
    }
    (a, b)
}
