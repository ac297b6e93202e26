use core::cmp::Ordering;
use core::fmt;
use core::ops::Neg;
use serde::{Serialize, Serializer};




/**
 * An exact rational number, always stored in lowest terms with a positive
 * denominator. Stencil weights and expression coefficients are carried in
 * this form so that symbolic comparisons never suffer round-off.
 *
 * Arithmetic is checked: every operation returns `None` rather than
 * overflowing the `i128` parts. Neither part is ever `i128::MIN`, so
 * negation is total.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i128,
    den: i128,
}




// ============================================================================
impl Rational {

    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };


    /**
     * Construct a rational from a numerator and a non-zero denominator.
     * Meant for literal constants; use [`Rational::checked_new`] for values
     * that come from input.
     */
    pub fn new(num: i128, den: i128) -> Self {
        match Self::checked_new(num, den) {
            Some(r) => r,
            None => panic!("rational {}/{} is not representable", num, den),
        }
    }


    /**
     * Construct a rational, or return `None` if the denominator is zero or
     * either part is `i128::MIN`.
     */
    pub fn checked_new(num: i128, den: i128) -> Option<Self> {
        if den == 0 || num == i128::MIN || den == i128::MIN {
            return None;
        }
        let g = gcd(num, den).max(1);
        let s = if den < 0 { -1 } else { 1 };
        Some(Self { num: s * (num / g), den: s * (den / g) })
    }

    pub fn integer(n: i64) -> Self {
        Self { num: n as i128, den: 1 }
    }

    pub fn numer(&self) -> i128 {
        self.num
    }

    pub fn denom(&self) -> i128 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn is_one(&self) -> bool {
        self.num == 1 && self.den == 1
    }

    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    pub fn is_negative(&self) -> bool {
        self.num < 0
    }


    /**
     * Return the multiplicative inverse, or `None` for zero.
     */
    pub fn recip(&self) -> Option<Self> {
        Self::checked_new(self.den, self.num)
    }

    pub fn checked_add(self, r: Self) -> Option<Self> {
        let g = gcd(self.den, r.den);
        let (a, b) = (self.den / g, r.den / g);
        let num = self.num.checked_mul(b)?.checked_add(r.num.checked_mul(a)?)?;
        Self::checked_new(num, self.den.checked_mul(b)?)
    }

    pub fn checked_sub(self, r: Self) -> Option<Self> {
        self.checked_add(-r)
    }

    pub fn checked_mul(self, r: Self) -> Option<Self> {
        let g1 = gcd(self.num, r.den).max(1);
        let g2 = gcd(r.num, self.den).max(1);
        let num = (self.num / g1).checked_mul(r.num / g2)?;
        let den = (self.den / g2).checked_mul(r.den / g1)?;
        Self::checked_new(num, den)
    }

    pub fn checked_div(self, r: Self) -> Option<Self> {
        self.checked_mul(r.recip()?)
    }


    /**
     * Raise to an integer power. Negative powers of zero and results too
     * large to represent yield `None`.
     */
    pub fn powi(&self, n: i32) -> Option<Self> {
        let mut base = if n < 0 { self.recip()? } else { *self };
        let mut k = n.unsigned_abs();
        let mut result = Self::ONE;

        while k > 0 {
            if k & 1 == 1 {
                result = result.checked_mul(base)?;
            }
            k >>= 1;
            if k > 0 {
                base = base.checked_mul(base)?;
            }
        }
        Some(result)
    }


    /**
     * Read a decimal literal such as `12`, `0.25` or `1.5e-3` exactly.
     * Returns `None` for malformed text and for values outside the `i128`
     * range.
     */
    pub fn parse_decimal(text: &str) -> Option<Self> {
        let (mantissa, exponent) = match text.find(|c| c == 'e' || c == 'E') {
            Some(n) => (&text[..n], text[n + 1..].parse::<i32>().ok()?),
            None => (text, 0),
        };
        let (whole, frac) = match mantissa.find('.') {
            Some(n) => (&mantissa[..n], &mantissa[n + 1..]),
            None => (mantissa, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let digits = format!("{}{}", whole, frac);
        let num: i128 = digits.parse().ok()?;
        let places = i32::try_from(frac.len()).ok()?;
        let scale = Self::integer(10).powi(exponent.checked_sub(places)?)?;
        Self::checked_new(num, 1)?.checked_mul(scale)
    }
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a as i128
}




/**
 * Compare `a/b` with `c/d` for positive `b` and `d` without forming cross
 * products, by comparing continued fraction expansions.
 */
fn compare_fractions(mut a: i128, mut b: i128, mut c: i128, mut d: i128) -> Ordering {
    let mut flipped = false;
    loop {
        let (qa, ra) = (a.div_euclid(b), a.rem_euclid(b));
        let (qc, rc) = (c.div_euclid(d), c.rem_euclid(d));

        let ordering = match (qa.cmp(&qc), ra == 0, rc == 0) {
            (Ordering::Equal, true, true) => Ordering::Equal,
            (Ordering::Equal, true, false) => Ordering::Less,
            (Ordering::Equal, false, true) => Ordering::Greater,
            (Ordering::Equal, false, false) => {
                // ra/b against rc/d is d/rc against b/ra
                a = b;
                b = ra;
                c = d;
                d = rc;
                flipped = !flipped;
                continue;
            }
            (ordering, _, _) => ordering,
        };
        return if flipped { ordering.reverse() } else { ordering };
    }
}




// ============================================================================
impl Neg for Rational {
    type Output = Self;
    fn neg(self) -> Self {
        Self { num: -self.num, den: self.den }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.num.checked_mul(other.den), other.num.checked_mul(self.den)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => compare_fractions(self.num, self.den, other.num, other.den),
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}




/**
 * Serialised as its display text, `"3"` or `"-1/12"`.
 */
impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Rational;

    #[test]
    fn rationals_are_kept_in_lowest_terms() {
        let r = Rational::new(6, -8);
        assert_eq!(r.numer(), -3);
        assert_eq!(r.denom(), 4);
        assert_eq!(Rational::new(1, 2).checked_add(Rational::new(1, 2)), Some(Rational::ONE));
        assert_eq!(Rational::checked_new(1, 0), None);
    }

    #[test]
    fn decimal_literals_are_read_exactly() {
        assert_eq!(Rational::parse_decimal("0.5"), Some(Rational::new(1, 2)));
        assert_eq!(Rational::parse_decimal("1.5e-3"), Some(Rational::new(3, 2000)));
        assert_eq!(Rational::parse_decimal("12"), Some(Rational::integer(12)));
        assert_eq!(Rational::parse_decimal("2.e2"), Some(Rational::integer(200)));
        assert_eq!(Rational::parse_decimal("."), None);
    }

    #[test]
    fn out_of_range_literals_are_rejected() {
        assert_eq!(Rational::parse_decimal("1e40"), None);
        assert_eq!(Rational::parse_decimal("1e-40"), None);
        assert_eq!(Rational::parse_decimal("1e2147483647"), None);
        assert_eq!(Rational::parse_decimal("99999999999999999999999999999999999999999"), None);
        assert!(Rational::parse_decimal("1e38").is_some());
    }

    #[test]
    fn integer_powers_work() {
        assert_eq!(Rational::new(2, 3).powi(2), Some(Rational::new(4, 9)));
        assert_eq!(Rational::new(2, 3).powi(-1), Some(Rational::new(3, 2)));
        assert_eq!(Rational::new(-2, 1).powi(3), Some(Rational::integer(-8)));
        assert_eq!(Rational::ZERO.powi(-1), None);
        assert_eq!(Rational::integer(2).powi(200), None);
        assert_eq!(Rational::integer(2).powi(126), Some(Rational::new(1 << 126, 1)));
    }

    #[test]
    fn arithmetic_reports_overflow() {
        let big = Rational::new(i128::MAX, 1);
        assert_eq!(big.checked_add(Rational::ONE), None);
        assert_eq!(big.checked_mul(Rational::integer(2)), None);
        assert_eq!(big.checked_sub(big), Some(Rational::ZERO));
        assert_eq!(big.checked_div(big), Some(Rational::ONE));
        assert_eq!(Rational::ONE.checked_div(Rational::ZERO), None);
        assert_eq!(-big, Rational::new(-i128::MAX, 1));
    }

    #[test]
    fn ordering_is_exact_for_large_parts() {
        let a = Rational::new(i128::MAX, i128::MAX - 1);
        let b = Rational::new(i128::MAX - 1, i128::MAX - 2);
        assert!(a < b);
        assert!(-a > -b);
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert_eq!(a.cmp(&a), core::cmp::Ordering::Equal);
    }

    #[test]
    fn rationals_serialise_as_text() {
        let mut bytes = Vec::new();
        let weight = Rational::new(-1, 12);
        rmp_serde::encode::write(&mut bytes, &weight).unwrap();
        let text: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(text, "-1/12");

        let big = Rational::new(i128::MAX, 1);
        let mut bytes = Vec::new();
        rmp_serde::encode::write(&mut bytes, &big).unwrap();
        let text: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(text, i128::MAX.to_string());
    }
}
