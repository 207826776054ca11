mod discretize;
mod regression;

pub(crate) use {discretize::discretize, regression::least_squares_slope};
