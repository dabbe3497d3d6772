//! Bound query arguments.
//!
//! `?` markers in `where_sql`, `select`, `cte` and `raw` fragments are bound
//! positionally to an argument list. A sequence argument (`Vec<T>`, `[T; N]`,
//! `&[T]`) expands its marker into one placeholder per element, which makes
//! `x IN (?)` work with a list.

use std::sync::Arc;
use tokio_postgres::types::ToSql;

use crate::types::JsonObject;

/// A type-erased, shareable bound value.
pub type Param = Arc<dyn ToSql + Sync + Send>;

/// One argument bound to a `?` marker.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A single value: the marker becomes one placeholder.
    One(Param),
    /// A sequence: the marker becomes a comma separated placeholder list.
    Many(Vec<Param>),
}

impl Arg {
    /// Number of placeholders this argument renders.
    pub fn len(&self) -> usize {
        match self {
            Arg::One(_) => 1,
            Arg::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bind any `ToSql` value as a single argument.
///
/// Use this for types that have no [`IntoArg`] impl, e.g. `Vec<u8>` bound as
/// `bytea` instead of being expanded as a list.
pub fn arg<T>(value: T) -> Arg
where
    T: ToSql + Sync + Send + 'static,
{
    Arg::One(Arc::new(value))
}

/// Scalar column types that bind as a single placeholder.
pub trait Scalar: ToSql + Sync + Send + 'static {}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(impl Scalar for $ty {})*
    };
}

impl_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u32,
    f32,
    f64,
    String,
    serde_json::Value,
    JsonObject,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveTime,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::Local>,
    chrono::DateTime<chrono::FixedOffset>,
    std::time::SystemTime,
    std::net::IpAddr,
);

impl<T: Scalar> Scalar for Option<T> {}

/// Conversion into a bound [`Arg`].
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

impl<T: Scalar> IntoArg for T {
    fn into_arg(self) -> Arg {
        Arg::One(Arc::new(self))
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Arg {
        Arg::One(Arc::new(self.to_string()))
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Arg {
        Arg::One(Arc::new(self.clone()))
    }
}

impl<T: Scalar> IntoArg for Vec<T> {
    fn into_arg(self) -> Arg {
        Arg::Many(self.into_iter().map(|v| Arc::new(v) as Param).collect())
    }
}

impl<T: Scalar + Clone> IntoArg for &[T] {
    fn into_arg(self) -> Arg {
        Arg::Many(self.iter().cloned().map(|v| Arc::new(v) as Param).collect())
    }
}

impl<T: Scalar, const N: usize> IntoArg for [T; N] {
    fn into_arg(self) -> Arg {
        Arg::Many(self.into_iter().map(|v| Arc::new(v) as Param).collect())
    }
}

impl IntoArg for Vec<&str> {
    fn into_arg(self) -> Arg {
        Arg::Many(
            self.into_iter()
                .map(|v| Arc::new(v.to_string()) as Param)
                .collect(),
        )
    }
}

/// Conversion into an argument list: `()`, tuples of [`IntoArg`] values, or
/// an already built `Vec<Arg>`.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

macro_rules! impl_into_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoArg),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Arg> {
                let ($($name,)+) = self;
                vec![$($name.into_arg()),+]
            }
        }
    };
}

impl_into_args_tuple!(A);
impl_into_args_tuple!(A, B);
impl_into_args_tuple!(A, B, C);
impl_into_args_tuple!(A, B, C, D);
impl_into_args_tuple!(A, B, C, D, E);
impl_into_args_tuple!(A, B, C, D, E, F);
impl_into_args_tuple!(A, B, C, D, E, F, G);
impl_into_args_tuple!(A, B, C, D, E, F, G, H);
