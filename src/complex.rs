use crate::IqType;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// One IQ sample as stored in the ring
pub type ComplexByte = Complex<IqType>;

/// View interleaved `[I, Q, I, Q, ...]` components as IQ pairs.
/// A trailing unpaired component is ignored.
pub fn pairs(components: &[IqType]) -> impl Iterator<Item = ComplexByte> + '_ {
    components
        .chunks_exact(2)
        .map(|iq| ComplexByte::new(iq[0], iq[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs() {
        let raw = [1i8, -1, 2, -2, 3];
        let iq: Vec<_> = pairs(&raw).collect();
        assert_eq!(iq, vec![Complex::new(1, -1), Complex::new(2, -2)]);
    }
}
