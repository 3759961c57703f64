pub mod buggy;
