/// Builds a [`TagSet`](crate::TagSet) from `key => value` pairs.
///
/// Keys and values accept anything `Into<String>`; validation happens at
/// registration time, when default tags are merged in.
///
/// # Examples
///
/// ```
/// use beacon_metrics::tags;
///
/// let empty = tags! {};
/// assert!(empty.is_empty());
///
/// let set = tags! { "route" => "/a", "method" => "get" };
/// assert_eq!(set.len(), 2);
///
/// let dynamic = tags! { "shard" => format!("shard-{}", 7) };
/// assert_eq!(dynamic.pairs()[0].1, "shard-7");
/// ```
#[macro_export]
macro_rules! tags {
    () => {
        $crate::TagSet::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut set = $crate::TagSet::new();
        $( set.insert($key, $value); )+
        set
    }};
}
