// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/feature.rs - 尺寸特征
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

/// 尺寸特征 = 归一化面积 × 距离²（米）。
///
/// 固定为拍摄记录中使用的乘法约定。移动端预测器曾用面积 ÷ 距离²，
/// 两者都出现过，模型实际用哪一个训练无法从代码确认；更换模型时需要一并核对。
pub fn size_feature(normalized_area: f32, distance_m: f32) -> f32 {
  normalized_area * distance_m * distance_m
}
