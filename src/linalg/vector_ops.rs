use faer::{Col, ColRef, unzip, zip};

use crate::E;

/// Scalar soft threshold `sign(x) * max(|x| - l, 0)`.
pub(crate) fn soft_threshold(x: E, l: E) -> E {
    x.signum() * (x.abs() - l).max(0.)
}

/// Scalar positive-part shrinkage `max(x - l, 0)`.
pub(crate) fn shrink_positive(x: E, l: E) -> E {
    (x - l).max(0.)
}

pub(crate) fn dot<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> E {
    let mut acc = E::from(0.);

    zip!(x1, x2).for_each(|unzip!(x1, x2)| acc += *x1 * *x2);

    acc
}

/// Coordinate-wise projection onto the non-negative orthant.
pub(crate) fn positive_part<'a>(x: ColRef<'a, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, out.as_mut()).for_each(|unzip!(x, out)| *out = x.max(0.));

    out
}

/// Relative change `‖new - old‖ / ‖old‖`.
///
/// A zero base vector yields 0 when the vectors coincide and +∞ otherwise.
pub(crate) fn relative_change<'a>(new: ColRef<'a, E>, old: ColRef<'a, E>) -> E {
    let mut diff = E::from(0.);
    let mut base = E::from(0.);

    zip!(new, old).for_each(|unzip!(new, old)| {
        let d = *new - *old;
        diff += d * d;
        base += *old * *old;
    });

    if base == 0. {
        if diff == 0. { 0. } else { E::INFINITY }
    } else {
        (diff / base).sqrt()
    }
}
