use std::{fmt, fs};

use numpy::PyReadonlyArray2;
use pyo3::{exceptions::PyRuntimeError, prelude::*, types::PyBytes};

use crate::{catboost, network, stream, treelite, Bundle, ConvertOptions};

trait IntoPyResult<T, E> {
    fn into_py_result(self) -> PyResult<T>;
}

impl<T, E: fmt::Display> IntoPyResult<T, E> for Result<T, E> {
    fn into_py_result(self) -> PyResult<T> {
        self.map_err(|err| PyErr::new::<PyRuntimeError, _>(format!("{err}")))
    }
}

#[pymodule]
fn _forestap(_py: Python, m: &PyModule) -> PyResult<()> {
    /// Converts a treelite JSON dump and returns the resulting bundle as JSON.
    #[pyfn(m)]
    fn convert_treelite(model_json: &str) -> PyResult<String> {
        let forest = treelite::Model::from_json(model_json)
            .into_py_result()?
            .into_forest()
            .into_py_result()?;
        let bundle = crate::convert(&forest, &ConvertOptions::default()).into_py_result()?;
        bundle.to_json().into_py_result()
    }

    #[pyfn(m)]
    fn convert_catboost(path: &str) -> PyResult<String> {
        let json = fs::read_to_string(path).into_py_result()?;
        let forest = catboost::Model::from_json(&json)
            .into_py_result()?
            .into_forest()
            .into_py_result()?;
        let bundle = crate::convert(&forest, &ConvertOptions::default()).into_py_result()?;
        bundle.to_json().into_py_result()
    }

    /// Describes the automaton network of a bundle as JSON.
    #[pyfn(m)]
    fn describe_network(bundle_json: &str) -> PyResult<String> {
        let bundle = Bundle::from_json(bundle_json).into_py_result()?;
        network::describe(&bundle).into_py_result()?.to_json().into_py_result()
    }

    #[pyfn(m)]
    fn encode_rows<'py>(
        py: Python<'py>,
        bundle_json: &str,
        rows: PyReadonlyArray2<'py, f64>,
    ) -> PyResult<&'py PyBytes> {
        let bundle = Bundle::from_json(bundle_json).into_py_result()?;
        let rows: Vec<Vec<f64>> = rows.as_array().rows().into_iter().map(|row| row.to_vec()).collect();
        let encoded =
            stream::encode_rows(&bundle.table, rows.iter().map(Vec::as_slice)).into_py_result()?;
        Ok(PyBytes::new(py, &encoded))
    }

    m.add_function(wrap_pyfunction!(convert_treelite, m)?)?;
    m.add_function(wrap_pyfunction!(convert_catboost, m)?)?;
    m.add_function(wrap_pyfunction!(describe_network, m)?)?;
    m.add_function(wrap_pyfunction!(encode_rows, m)?)?;

    Ok(())
}
