// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use ndarray::Array1;
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  error::CoreError,
  frame::{DetectorTensor, RegressorTensor},
  model::{DetectorBackend, DetectorOutput, RegressorBackend},
};

const ONNX_SCHEME: &str = "onnx";

const DETECTOR_INPUT_NAME: &str = "images";
const REGRESSOR_IMAGE_NAME: &str = "image";
const REGRESSOR_FEATURE_NAME: &str = "size_feature";

/// `onnx:///path/model.onnx?threads=4&output=output0` 共有的参数。
/// 不指定 `output` 时读取模型的第一个输出。
#[derive(Debug, Clone)]
struct SessionOptions {
  model_path: PathBuf,
  threads: usize,
  output: Option<String>,
}

impl SessionOptions {
  fn from_url(url: &Url) -> Result<Self, CoreError> {
    let model_path = PathBuf::from(
      urlencoding::decode(url.path())
        .map_err(|e| CoreError::model_load(url.as_str(), e))?
        .into_owned(),
    );

    if url.scheme() != ONNX_SCHEME {
      return Err(CoreError::model_load(
        url.as_str(),
        format!("模型路径必须使用 {} 方案", ONNX_SCHEME),
      ));
    }

    let mut threads = 1;
    let mut output = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threads" => {
          threads = value
            .parse()
            .map_err(|e| CoreError::model_load(url.as_str(), format!("threads 参数无效: {}", e)))?;
        }
        "output" => output = Some(value.into_owned()),
        _ => debug!("忽略未知模型参数: {}={}", key, value),
      }
    }

    Ok(Self {
      model_path,
      threads,
      output,
    })
  }

  /// 创建会话并确定要读取的输出名称
  fn commit(&self) -> Result<(Session, String), CoreError> {
    let path = self.model_path.display().to_string();
    if !Path::new(&self.model_path).is_file() {
      return Err(CoreError::model_load(&path, "模型文件不存在"));
    }

    info!("加载模型文件: {} (线程数 {})", path, self.threads);
    let session = Session::builder()
      .map_err(|e| CoreError::model_load(&path, e))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| CoreError::model_load(&path, e))?
      .with_intra_threads(self.threads)
      .map_err(|e| CoreError::model_load(&path, e))?
      .commit_from_file(&self.model_path)
      .map_err(|e| CoreError::model_load(&path, e))?;

    for input in session.inputs.iter() {
      debug!("模型输入: {}", input.name);
    }
    for output in session.outputs.iter() {
      debug!("模型输出: {}", output.name);
    }

    let available: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    let output_name = select_output(&path, self.output.as_deref(), &available)?;
    info!("模型加载完成，读取输出 {}", output_name);

    Ok((session, output_name))
  }
}

fn select_output(path: &str, requested: Option<&str>, available: &[&str]) -> Result<String, CoreError> {
  match requested {
    Some(name) if available.contains(&name) => Ok(name.to_string()),
    Some(name) => Err(CoreError::model_load(
      path,
      format!("模型没有名为 {} 的输出，可用输出: {:?}", name, available),
    )),
    None => available
      .first()
      .map(|name| name.to_string())
      .ok_or_else(|| CoreError::model_load(path, "模型没有输出")),
  }
}

/// 回归模型的输出必须恰好是一个数
fn scalar_output(output: ndarray::ArrayViewD<f32>) -> Result<f32, CoreError> {
  match output.len() {
    1 => output
      .iter()
      .next()
      .copied()
      .ok_or_else(|| CoreError::inference("回归模型输出为空")),
    n => Err(CoreError::inference(format!(
      "回归模型输出形状无效: {:?} ({} 个元素)",
      output.shape(),
      n
    ))),
  }
}

pub struct OnnxDetectorBuilder {
  options: SessionOptions,
}

impl FromUrl for OnnxDetectorBuilder {
  type Error = CoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      options: SessionOptions::from_url(url)?,
    })
  }
}

impl FromUrlWithScheme for OnnxDetectorBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl OnnxDetectorBuilder {
  pub fn threads(mut self, threads: usize) -> Self {
    self.options.threads = threads;
    self
  }

  pub fn build(self) -> Result<OnnxDetector, CoreError> {
    let (session, output_name) = self.options.commit()?;
    Ok(OnnxDetector {
      session,
      output_name,
    })
  }
}

/// 检测模型：输入 `images` `[1,3,640,640]`，输出 `[1,4+C,N]`
pub struct OnnxDetector {
  session: Session,
  output_name: String,
}

impl DetectorBackend for OnnxDetector {
  fn forward(&mut self, input: &DetectorTensor) -> Result<DetectorOutput, CoreError> {
    let input_tensor = Tensor::from_array(input.to_array()).map_err(CoreError::inference)?;
    let outputs = self
      .session
      .run(ort::inputs![DETECTOR_INPUT_NAME => input_tensor])
      .map_err(CoreError::inference)?;

    let output: ndarray::ArrayViewD<f32> = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| CoreError::inference(format!("推理结果中没有输出 {}", self.output_name)))?
      .try_extract_array()
      .map_err(CoreError::inference)?;

    let shape = output.shape().to_vec();
    debug!("检测器输出形状: {:?}", shape);
    DetectorOutput::from_shape(output.iter().copied().collect(), &shape)
  }
}

pub struct OnnxRegressorBuilder {
  options: SessionOptions,
}

impl FromUrl for OnnxRegressorBuilder {
  type Error = CoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      options: SessionOptions::from_url(url)?,
    })
  }
}

impl FromUrlWithScheme for OnnxRegressorBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl OnnxRegressorBuilder {
  pub fn threads(mut self, threads: usize) -> Self {
    self.options.threads = threads;
    self
  }

  pub fn build(self) -> Result<OnnxRegressor, CoreError> {
    let (session, output_name) = self.options.commit()?;
    Ok(OnnxRegressor {
      session,
      output_name,
    })
  }
}

/// 重量回归模型：输入 `image` `[1,3,224,224]` 与 `size_feature` `[1]`，输出单个标量
pub struct OnnxRegressor {
  session: Session,
  output_name: String,
}

impl RegressorBackend for OnnxRegressor {
  fn forward(&mut self, image: &RegressorTensor, size_feature: f32) -> Result<f32, CoreError> {
    let image_tensor = Tensor::from_array(image.to_array()).map_err(CoreError::inference)?;
    let feature_tensor =
      Tensor::from_array(Array1::from_vec(vec![size_feature])).map_err(CoreError::inference)?;

    let outputs = self
      .session
      .run(ort::inputs![
        REGRESSOR_IMAGE_NAME => image_tensor,
        REGRESSOR_FEATURE_NAME => feature_tensor,
      ])
      .map_err(CoreError::inference)?;

    let output: ndarray::ArrayViewD<f32> = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| CoreError::inference(format!("推理结果中没有输出 {}", self.output_name)))?
      .try_extract_array()
      .map_err(CoreError::inference)?;

    scalar_output(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_url_options() {
    let url = Url::parse("onnx:///opt/models/cow%20weight.onnx?threads=4&output=pred").unwrap();
    let options = SessionOptions::from_url(&url).unwrap();

    assert_eq!(options.model_path, PathBuf::from("/opt/models/cow weight.onnx"));
    assert_eq!(options.threads, 4);
    assert_eq!(options.output.as_deref(), Some("pred"));
  }

  #[test]
  fn wrong_scheme_or_missing_file_is_a_load_error() {
    let url = Url::parse("file:///opt/model.onnx").unwrap();
    assert!(matches!(
      OnnxDetectorBuilder::from_url(&url),
      Err(CoreError::ModelLoad { .. })
    ));

    let url = Url::parse("onnx:///definitely/not/here.onnx").unwrap();
    let result = OnnxRegressorBuilder::from_url(&url).and_then(|b| b.build());
    assert!(matches!(result, Err(CoreError::ModelLoad { .. })));
  }

  #[test]
  fn output_defaults_to_first_and_must_exist() {
    let available = ["output0", "aux"];
    assert_eq!(select_output("m.onnx", None, &available).unwrap(), "output0");
    assert_eq!(select_output("m.onnx", Some("aux"), &available).unwrap(), "aux");

    assert!(matches!(
      select_output("m.onnx", Some("weight"), &["weight_prediction"]),
      Err(CoreError::ModelLoad { .. })
    ));
    assert!(matches!(
      select_output("m.onnx", None, &[]),
      Err(CoreError::ModelLoad { .. })
    ));
  }

  #[test]
  fn regressor_output_must_be_a_single_value() {
    let one = ndarray::ArrayD::from_shape_vec(vec![1, 1], vec![412.5f32]).unwrap();
    assert_eq!(scalar_output(one.view()), Ok(412.5));

    let empty = ndarray::ArrayD::<f32>::zeros(vec![1, 0]);
    assert!(matches!(scalar_output(empty.view()), Err(CoreError::Inference(_))));

    let many = ndarray::ArrayD::<f32>::zeros(vec![1, 3]);
    assert!(matches!(scalar_output(many.view()), Err(CoreError::Inference(_))));
  }
}
