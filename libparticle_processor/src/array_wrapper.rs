use ndarray::Array1;
use std::ops::{Index, IndexMut};

/// Uniform read access to a per-particle column, whether it was read lazily from an HDF5
/// dataset or built eagerly from parsed text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayWrapper {
    array: Array1<f64>,
}

impl ArrayWrapper {
    pub fn new(array: Array1<f64>) -> Self {
        Self { array }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            array: Array1::zeros(len),
        }
    }

    pub fn filled(len: usize, value: f64) -> Self {
        Self {
            array: Array1::from_elem(len, value),
        }
    }

    /// The underlying array. Callers treat it as read-only.
    pub fn value(&self) -> &Array1<f64> {
        &self.array
    }

    pub fn value_mut(&mut self) -> &mut Array1<f64> {
        &mut self.array
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.array.get(index).copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.array.to_vec()
    }

    pub fn append(&mut self, value: f64) {
        let mut values = self.array.to_vec();
        values.push(value);
        self.array = Array1::from_vec(values);
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.array.iter()
    }
}

impl From<Vec<f64>> for ArrayWrapper {
    fn from(values: Vec<f64>) -> Self {
        Self {
            array: Array1::from_vec(values),
        }
    }
}

impl From<Array1<f64>> for ArrayWrapper {
    fn from(array: Array1<f64>) -> Self {
        Self { array }
    }
}

impl FromIterator<f64> for ArrayWrapper {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        Self {
            array: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for ArrayWrapper {
    type Output = f64;
    fn index(&self, index: usize) -> &Self::Output {
        &self.array[index]
    }
}

impl IndexMut<usize> for ArrayWrapper {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.array[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_and_array_agree() {
        let from_list = ArrayWrapper::from(vec![1.0, 2.0, 3.0]);
        let from_array = ArrayWrapper::new(ndarray::arr1(&[1.0, 2.0, 3.0]));
        assert_eq!(from_list, from_array);
        assert_eq!(from_list.len(), 3);
        assert_eq!(from_list[1], 2.0);
        assert_eq!(from_list.get(3), None);
    }

    #[test]
    fn test_append() {
        let mut wrapper = ArrayWrapper::zeros(2);
        wrapper.append(5.0);
        wrapper[0] = 1.0;
        assert_eq!(wrapper.to_vec(), vec![1.0, 0.0, 5.0]);
    }
}
