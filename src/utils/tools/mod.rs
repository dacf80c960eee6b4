use rabe_bn::Fr;

/// Maps a share evaluation point into the scalar field. Indices stay far
/// below the field order, so the decimal conversion cannot fail.
pub fn usize_to_fr(i: usize) -> Fr {
    Fr::from_str(&i.to_string()).unwrap()
}

pub fn contains(data: &[String], value: &str) -> bool {
    data.iter().any(|item| item == value)
}
